//! Newline-delimited JSON flow ingestion
//!
//! A proxy engine exports each completed flow as one JSON object per line.
//! Bodies are base64 encoded. Header values are JSON strings, or arrays of
//! byte values for headers that are not valid UTF-8.

use super::addon::{HttpRecorderAddon, ResponseOutcome};
use crate::error::{CaptureError, Result};
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use chrono::{DateTime, Utc};
use flowrec_core::{FlowError, FlowRecord, Headers, HttpVersion, Request, Response, Timings};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMessage {
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub client_addr: Option<SocketAddr>,
    #[serde(default)]
    pub server_addr: Option<SocketAddr>,
    pub request: RequestMessage,
    #[serde(default)]
    pub response: Option<ResponseMessage>,
    #[serde(default)]
    pub error: Option<ErrorMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMessage {
    #[serde(default = "default_http_version")]
    pub http_version: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, HeaderValue)>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default = "default_http_version")]
    pub http_version: String,
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<(String, HeaderValue)>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp_end: Option<DateTime<Utc>>,
}

/// Header value as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Raw(Vec<u8>),
}

impl From<HeaderValue> for Vec<u8> {
    fn from(value: HeaderValue) -> Self {
        match value {
            HeaderValue::Text(text) => text.into_bytes(),
            HeaderValue::Raw(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub msg: String,
}

fn default_http_version() -> String {
    "HTTP/1.1".to_string()
}

fn decode_body(body: Option<String>, what: &str) -> std::result::Result<Option<Vec<u8>>, String> {
    body.map(|b| {
        BASE64_ENGINE
            .decode(b.as_bytes())
            .map_err(|e| format!("{} body is not valid base64: {}", what, e))
    })
    .transpose()
}

fn headers(pairs: Vec<(String, HeaderValue)>) -> Headers {
    pairs.into_iter().collect()
}

impl FlowMessage {
    /// Convert into a recorder snapshot, stamping the capture time if absent
    pub fn into_record(self) -> std::result::Result<FlowRecord, String> {
        let url = Url::parse(&self.request.url)
            .map_err(|e| format!("invalid url {:?}: {}", self.request.url, e))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("url {:?} has no host", self.request.url))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("url {:?} has no port", self.request.url))?;
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };

        let request = Request {
            http_version: self
                .request
                .http_version
                .parse::<HttpVersion>()
                .map_err(|e| e.to_string())?,
            method: self.request.method,
            scheme: url.scheme().to_string(),
            host,
            port,
            path,
            headers: headers(self.request.headers),
            body: decode_body(self.request.body, "request")?,
        };

        let response_end = self.response.as_ref().and_then(|r| r.timestamp_end);
        let response = self
            .response
            .map(|r| -> std::result::Result<Response, String> {
                Ok(Response {
                    http_version: r.http_version.parse::<HttpVersion>().map_err(|e| e.to_string())?,
                    status_code: r.status_code,
                    headers: headers(r.headers),
                    body: decode_body(r.body, "response")?,
                })
            })
            .transpose()?;

        Ok(FlowRecord {
            id: self.id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            client_addr: self.client_addr,
            server_addr: self.server_addr,
            timings: self.request.timestamp_start.map(|start| Timings {
                request_start: start,
                response_end,
            }),
            request,
            response,
            error: self.error.map(|e| FlowError { msg: e.msg }),
        })
    }
}

/// Parse one NDJSON line into a flow snapshot
pub fn parse_line(line_no: usize, line: &str) -> Result<FlowRecord> {
    let message: FlowMessage = serde_json::from_str(line).map_err(|e| CaptureError::Ingest {
        line: line_no,
        reason: e.to_string(),
    })?;
    message
        .into_record()
        .map_err(|reason| CaptureError::Ingest {
            line: line_no,
            reason,
        })
}

/// Totals for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub malformed: u64,
    pub recorded: u64,
    pub filtered: u64,
    pub failed: u64,
}

/// Feed every flow read from `reader` through the addon until EOF or `cancel`
///
/// Malformed lines, including lines that are not UTF-8, are logged and
/// skipped. Recorder calls block on file I/O, so they run on the blocking
/// pool one at a time, preserving input order in the record file.
/// Cancellation only interrupts the wait for the next line: a flow already
/// handed to the recorder is always seen through before returning.
pub async fn run<R>(
    reader: R,
    addon: Arc<HttpRecorderAddon>,
    cancel: CancellationToken,
) -> Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut segments = reader.split(b'\n');
    let mut line_no = 0;

    loop {
        let segment = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Ingestion cancelled after {} lines", line_no);
                break;
            }
            segment = segments.next_segment() => segment?,
        };
        let Some(segment) = segment else {
            break;
        };
        line_no += 1;

        let line = match String::from_utf8(segment) {
            Ok(line) => line,
            Err(_) => {
                warn!("Malformed flow message on line {}: not valid UTF-8", line_no);
                stats.lines += 1;
                stats.malformed += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let flow = match parse_line(line_no, &line) {
            Ok(flow) => flow,
            Err(e) => {
                warn!("{}", e);
                stats.malformed += 1;
                continue;
            }
        };

        let addon = Arc::clone(&addon);
        let outcome = tokio::task::spawn_blocking(move || addon.response(flow)).await?;
        match outcome {
            ResponseOutcome::Recorded { index } => {
                debug!("Recorded line {} as record {}", line_no, index);
                stats.recorded += 1;
            }
            ResponseOutcome::Filtered(_) | ResponseOutcome::Skipped(_) => stats.filtered += 1,
            ResponseOutcome::Failed => stats.failed += 1,
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RecorderSection;
    use crate::filter::FlowFilter;
    use flowrec_core::decode_stream;
    use std::fs;
    use tempfile::TempDir;

    const GET_LINE: &str = r#"{"id":"a","client_addr":"127.0.0.1:50123","server_addr":"93.184.216.34:443","request":{"http_version":"HTTP/1.1","method":"GET","url":"https://example.com/search?q=rust","headers":[["Host","example.com"],["Accept","*/*"]],"timestamp_start":"2024-05-01T12:00:00Z"},"response":{"http_version":"HTTP/1.1","status_code":200,"headers":[["Content-Type","text/plain"]],"body":"b2s=","timestamp_end":"2024-05-01T12:00:01Z"}}"#;

    #[test]
    fn test_parse_line_maps_fields() {
        let flow = parse_line(1, GET_LINE).unwrap();

        assert_eq!(flow.id, "a");
        assert_eq!(flow.request.method, "GET");
        assert_eq!(flow.request.scheme, "https");
        assert_eq!(flow.request.host, "example.com");
        assert_eq!(flow.request.port, 443);
        assert_eq!(flow.request.path, "/search?q=rust");
        assert_eq!(flow.request.headers.get("host"), Some(&b"example.com"[..]));
        assert_eq!(flow.request.body, None);
        assert_eq!(flow.server_addr, Some("93.184.216.34:443".parse().unwrap()));

        let response = flow.response.as_ref().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body.as_deref(), Some(&b"ok"[..]));

        let timings = flow.timings.unwrap();
        assert!(timings.response_end.unwrap() > timings.request_start);
        assert!(flow.error.is_none());
    }

    #[test]
    fn test_parse_raw_header_bytes() {
        let line = r#"{"id":"r","request":{"method":"GET","url":"http://example.com/","headers":[["X-Raw",[255,0,104,105]],["Accept","*/*"]]},"response":{"status_code":204,"headers":[["Set-Cookie",[99,61,128]]]}}"#;
        let flow = parse_line(1, line).unwrap();

        assert_eq!(flow.request.headers.get("x-raw"), Some(&[255u8, 0, 104, 105][..]));
        assert_eq!(flow.request.headers.get("accept"), Some(&b"*/*"[..]));
        let response = flow.response.unwrap();
        assert_eq!(response.headers.get("set-cookie"), Some(&[99u8, 61, 128][..]));
    }

    #[test]
    fn test_parse_errored_flow() {
        let line = r#"{"id":"e","request":{"method":"POST","url":"http://[::1]:8080/upload","body":""},"error":{"msg":"connection refused"}}"#;
        let flow = parse_line(3, line).unwrap();

        assert_eq!(flow.request.host, "::1");
        assert_eq!(flow.request.port, 8080);
        assert_eq!(flow.request.body, Some(Vec::new()));
        assert!(flow.response.is_none());
        assert_eq!(flow.error.unwrap().msg, "connection refused");
    }

    #[test]
    fn test_parse_line_rejects_bad_input() {
        for (line, what) in [
            ("not json", "json"),
            (r#"{"id":"x","request":{"method":"GET","url":"not a url"}}"#, "url"),
            (
                r#"{"id":"x","request":{"method":"GET","url":"http://h/","body":"***"}}"#,
                "base64",
            ),
            (
                r#"{"id":"x","request":{"http_version":"HTTP/9","method":"GET","url":"http://h/"}}"#,
                "version",
            ),
        ] {
            match parse_line(7, line) {
                Err(CaptureError::Ingest { line: 7, .. }) => {}
                other => panic!("{} input accepted: {:?}", what, other),
            }
        }
    }

    #[tokio::test]
    async fn test_run_records_filtered_stream() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("flows.rec");
        let addon = Arc::new(HttpRecorderAddon::new(FlowFilter::builtin().unwrap()));
        addon
            .configure(&RecorderSection {
                dest: dest.clone(),
                ..Default::default()
            })
            .unwrap();

        let input = format!(
            "{}\n\n{}\n{}\n{}\n",
            GET_LINE,
            r#"{"id":"font","request":{"method":"GET","url":"https://fonts.gstatic.com/s.woff2"},"response":{"status_code":200}}"#,
            "garbage",
            r#"{"id":"err","request":{"method":"GET","url":"https://example.com/"},"error":{"msg":"timeout"}}"#,
        );

        let stats = run(input.as_bytes(), Arc::clone(&addon), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            stats,
            IngestStats {
                lines: 4,
                malformed: 1,
                recorded: 1,
                filtered: 2,
                failed: 0,
            }
        );

        addon.done().unwrap();
        let data = fs::read(&dest).unwrap();
        let ids: Vec<String> = decode_stream(&data).map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    fn recording_addon(dest: &std::path::Path) -> Arc<HttpRecorderAddon> {
        let addon = Arc::new(HttpRecorderAddon::new(FlowFilter::allow_all()));
        addon
            .configure(&RecorderSection {
                dest: dest.to_path_buf(),
                ..Default::default()
            })
            .unwrap();
        addon
    }

    fn recorded_ids(dest: &std::path::Path) -> Vec<String> {
        let data = fs::read(dest).unwrap();
        decode_stream(&data).map(|r| r.unwrap().id).collect()
    }

    #[tokio::test]
    async fn test_run_skips_invalid_utf8_line() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("flows.rec");
        let addon = recording_addon(&dest);

        let mut input = Vec::new();
        input.extend_from_slice(GET_LINE.as_bytes());
        input.extend_from_slice(b"\n\xff\xfe garbage\n");
        input.extend_from_slice(GET_LINE.replace(r#""id":"a""#, r#""id":"b""#).as_bytes());
        input.extend_from_slice(b"\r\n");

        let stats = run(&input[..], Arc::clone(&addon), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats.lines, 3);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.recorded, 2);

        addon.done().unwrap();
        assert_eq!(recorded_ids(&dest), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_run_cancel_keeps_accepted_flows() {
        use tokio::io::AsyncWriteExt;
        use tokio::time::{sleep, Duration};

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("flows.rec");
        let addon = recording_addon(&dest);

        // Writer half stays open, so the reader never sees EOF
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        writer.write_all(GET_LINE.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            tokio::io::BufReader::new(reader),
            Arc::clone(&addon),
            cancel.clone(),
        ));

        for _ in 0..500 {
            if addon.stats().recorded == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.lines, 1);
        assert_eq!(stats.recorded, 1);

        let summary = addon.done().unwrap().unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(recorded_ids(&dest), vec!["a"]);
        drop(writer);
    }

    #[tokio::test]
    async fn test_run_cancelled_before_start_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("flows.rec");
        let addon = recording_addon(&dest);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let input = format!("{}\n", GET_LINE);
        let stats = run(input.as_bytes(), Arc::clone(&addon), cancel).await.unwrap();
        assert_eq!(stats, IngestStats::default());
        assert_eq!(addon.stats().seen, 0);
    }
}
