//! Flow snapshot types persisted by the recorder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    Http09,
    Http10,
    Http11,
    H2,
    H3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpVersionParseError(String);

impl fmt::Display for HttpVersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid http version: {}", self.0)
    }
}

impl std::error::Error for HttpVersionParseError {}

impl FromStr for HttpVersion {
    type Err = HttpVersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/0.9" => Ok(Self::Http09),
            "HTTP/1.0" => Ok(Self::Http10),
            "HTTP/1.1" => Ok(Self::Http11),
            "HTTP/2" | "HTTP/2.0" => Ok(Self::H2),
            "HTTP/3" | "HTTP/3.0" => Ok(Self::H3),
            v => Err(HttpVersionParseError(v.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Http09 => "HTTP/0.9",
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
            Self::H2 => "HTTP/2.0",
            Self::H3 => "HTTP/3.0",
        };
        f.write_str(s)
    }
}

/// Ordered header list with case-insensitive lookup
///
/// Names and values are kept exactly as they appeared on the wire, in
/// arrival order, so a decoded record reproduces the original framing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, ignoring ASCII case
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// All values for `name` in arrival order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<Vec<u8>>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub http_version: HttpVersion,
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path including the query string
    pub path: String,
    pub headers: Headers,
    /// `None` when the body was streamed through without buffering
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn url(&self) -> String {
        let default_port = matches!(
            (self.scheme.as_str(), self.port),
            ("http", 80) | ("https", 443)
        );
        if default_port {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        } else {
            format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
        }
    }

    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub http_version: HttpVersion,
    pub status_code: u16,
    pub headers: Headers,
    pub body: Option<Vec<u8>>,
}

impl Response {
    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub request_start: DateTime<Utc>,
    pub response_end: Option<DateTime<Utc>>,
}

/// Error carried over from the proxy layer for a flow that never completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowError {
    pub msg: String,
}

/// Immutable snapshot of one intercepted request/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub client_addr: Option<SocketAddr>,
    pub server_addr: Option<SocketAddr>,
    pub timings: Option<Timings>,
    pub request: Request,
    pub response: Option<Response>,
    pub error: Option<FlowError>,
}

/// Why a flow was refused persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Errored,
    MissingResponse,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Errored => f.write_str("flow carries an error"),
            Self::MissingResponse => f.write_str("flow has no response"),
        }
    }
}

impl FlowRecord {
    /// Snapshot a completed exchange, stamped with the current time
    pub fn new(id: impl Into<String>, request: Request, response: Response) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            client_addr: None,
            server_addr: None,
            timings: None,
            request,
            response: Some(response),
            error: None,
        }
    }

    /// Snapshot an exchange that failed before a response was produced
    pub fn failed(id: impl Into<String>, request: Request, error: FlowError) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            client_addr: None,
            server_addr: None,
            timings: None,
            request,
            response: None,
            error: Some(error),
        }
    }

    /// Checks the persistence invariant: no error and a response present
    pub fn check_recordable(&self) -> std::result::Result<(), SkipReason> {
        if self.error.is_some() {
            return Err(SkipReason::Errored);
        }
        if self.response.is_none() {
            return Err(SkipReason::MissingResponse);
        }
        Ok(())
    }

    pub fn is_recordable(&self) -> bool {
        self.check_recordable().is_ok()
    }

    pub fn host(&self) -> &str {
        &self.request.host
    }
}
