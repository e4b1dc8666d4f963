//! Self-delimiting frame format for flow records
//!
//! Every record is written as one frame:
//!
//! ```text
//! +--------+------------+-----------+------------------+
//! | "FRv1" | len u32 LE | crc u32 LE | payload (bincode) |
//! +--------+------------+-----------+------------------+
//! ```
//!
//! Frames are independent, so a stream can be cut at any byte boundary and
//! every frame that ended before the cut still decodes. A short trailing
//! frame is reported as a torn tail, never as a record.

use crate::error::{CodecError, CorruptReason};
use crate::record::FlowRecord;
use std::io::{self, Read};

pub const FRAME_MAGIC: [u8; 4] = *b"FRv1";
pub const FRAME_HEADER_SIZE: usize = 12;
pub const MAX_RECORD_SIZE: usize = 256 * (1 << 20); // 256 MiB

/// Encode one record into a complete frame
pub fn encode(flow: &FlowRecord) -> Result<Vec<u8>, CodecError> {
    let payload = bincode::serialize(flow).map_err(CodecError::Serialize)?;
    if payload.len() > MAX_RECORD_SIZE {
        return Err(CodecError::TooLarge {
            size: payload.len(),
            max: MAX_RECORD_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Payload length and stored checksum of a complete frame header
fn parse_header(header: &[u8]) -> Result<(usize, u32), CorruptReason> {
    if header[..4] != FRAME_MAGIC {
        return Err(CorruptReason::BadMagic);
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let stored = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if len as usize > MAX_RECORD_SIZE {
        return Err(CorruptReason::Oversize(len));
    }
    Ok((len as usize, stored))
}

fn decode_payload(payload: &[u8], stored: u32) -> Result<FlowRecord, CorruptReason> {
    let computed = crc32fast::hash(payload);
    if computed != stored {
        return Err(CorruptReason::Checksum { stored, computed });
    }
    bincode::deserialize(payload).map_err(|e| CorruptReason::Payload(e.to_string()))
}

/// Lazily decode records from the start of `data`
pub fn decode_stream(data: &[u8]) -> RecordStream<'_> {
    RecordStream {
        data,
        offset: 0,
        torn_tail: None,
        done: false,
    }
}

/// Iterator over the records of an encoded stream, in append order
///
/// Yields `Err` at most once, for the first corrupt frame, and then ends.
#[derive(Debug)]
pub struct RecordStream<'a> {
    data: &'a [u8],
    offset: usize,
    torn_tail: Option<usize>,
    done: bool,
}

impl<'a> RecordStream<'a> {
    /// Length of the prefix made of complete, verified frames
    pub fn valid_len(&self) -> usize {
        self.offset
    }

    /// Offset of an incomplete trailing frame, once the stream reached it
    pub fn torn_tail(&self) -> Option<usize> {
        self.torn_tail
    }

    fn tear(&mut self) -> Option<Result<FlowRecord, CodecError>> {
        self.torn_tail = Some(self.offset);
        self.done = true;
        None
    }

    fn corrupt(&mut self, reason: CorruptReason) -> Option<Result<FlowRecord, CodecError>> {
        self.done = true;
        Some(Err(CodecError::Corrupt {
            offset: self.offset,
            reason,
        }))
    }
}

impl<'a> Iterator for RecordStream<'a> {
    type Item = Result<FlowRecord, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            self.done = true;
            return None;
        }
        if rest.len() < FRAME_HEADER_SIZE {
            return self.tear();
        }

        let (len, stored) = match parse_header(&rest[..FRAME_HEADER_SIZE]) {
            Ok(header) => header,
            Err(reason) => return self.corrupt(reason),
        };
        let end = FRAME_HEADER_SIZE + len;
        if rest.len() < end {
            return self.tear();
        }

        match decode_payload(&rest[FRAME_HEADER_SIZE..end], stored) {
            Ok(flow) => {
                self.offset += end;
                Some(Ok(flow))
            }
            Err(reason) => self.corrupt(reason),
        }
    }
}

impl<'a> std::iter::FusedIterator for RecordStream<'a> {}

/// Integrity summary of an encoded stream
#[derive(Debug)]
pub struct ScanReport {
    pub records: u64,
    pub valid_len: usize,
    pub total_len: usize,
    pub torn_tail: Option<usize>,
    pub corruption: Option<CodecError>,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.torn_tail.is_none() && self.corruption.is_none()
    }

    /// Bytes past the last complete frame
    pub fn trailing_bytes(&self) -> usize {
        self.total_len - self.valid_len
    }
}

/// Walk the whole stream, verifying every frame
pub fn scan(data: &[u8]) -> ScanReport {
    let mut stream = decode_stream(data);
    let mut records = 0;
    let mut corruption = None;

    for item in stream.by_ref() {
        match item {
            Ok(_) => records += 1,
            Err(e) => corruption = Some(e),
        }
    }

    ScanReport {
        records,
        valid_len: stream.valid_len(),
        total_len: data.len(),
        torn_tail: stream.torn_tail(),
        corruption,
    }
}

/// Walk a stream read from `reader`, holding one frame in memory at a time
///
/// Produces the same report as [`scan`] over the same bytes. Only I/O
/// failures of the reader itself are returned as errors.
pub fn scan_reader<R: Read>(mut reader: R) -> io::Result<ScanReport> {
    let mut records = 0;
    let mut valid_len = 0;
    let mut consumed = 0;
    let mut torn_tail = None;
    let mut corruption = None;
    let mut header = Vec::with_capacity(FRAME_HEADER_SIZE);
    let mut payload = Vec::new();

    loop {
        header.clear();
        consumed += (&mut reader)
            .take(FRAME_HEADER_SIZE as u64)
            .read_to_end(&mut header)?;
        if header.is_empty() {
            break;
        }
        if header.len() < FRAME_HEADER_SIZE {
            torn_tail = Some(valid_len);
            break;
        }

        let (len, stored) = match parse_header(&header) {
            Ok(parsed) => parsed,
            Err(reason) => {
                corruption = Some(CodecError::Corrupt {
                    offset: valid_len,
                    reason,
                });
                break;
            }
        };

        // Grows with the bytes actually present, not the claimed length
        payload.clear();
        consumed += (&mut reader).take(len as u64).read_to_end(&mut payload)?;
        if payload.len() < len {
            torn_tail = Some(valid_len);
            break;
        }

        match decode_payload(&payload, stored) {
            Ok(_) => {
                records += 1;
                valid_len += FRAME_HEADER_SIZE + len;
            }
            Err(reason) => {
                corruption = Some(CodecError::Corrupt {
                    offset: valid_len,
                    reason,
                });
                break;
            }
        }
    }
    consumed += io::copy(&mut reader, &mut io::sink())? as usize;

    Ok(ScanReport {
        records,
        valid_len,
        total_len: consumed,
        torn_tail,
        corruption,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FlowError, Headers, HttpVersion, Request, Response};

    fn flow(i: usize) -> FlowRecord {
        let request = Request {
            http_version: HttpVersion::Http11,
            method: if i % 2 == 0 { "GET" } else { "POST" }.to_string(),
            scheme: "https".to_string(),
            host: format!("host{}.example.com", i % 7),
            port: 443,
            path: format!("/items/{}", i),
            headers: [("Host", "example.com"), ("X-Index", "v")].into_iter().collect(),
            body: if i % 3 == 0 { None } else { Some(vec![i as u8; i % 50]) },
        };
        let response = Response {
            http_version: HttpVersion::H2,
            status_code: 200 + (i % 5) as u16,
            headers: Headers::new(),
            body: Some(format!("body {}", i).into_bytes()),
        };
        FlowRecord::new(format!("flow-{}", i), request, response)
    }

    fn encode_all(flows: &[FlowRecord]) -> (Vec<u8>, Vec<usize>) {
        let mut data = Vec::new();
        let mut ends = Vec::new();
        for f in flows {
            data.extend(encode(f).unwrap());
            ends.push(data.len());
        }
        (data, ends)
    }

    fn decode_ok(data: &[u8]) -> Vec<FlowRecord> {
        decode_stream(data).map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_round_trip_sizes() {
        for n in [0usize, 1, 1000] {
            let flows: Vec<FlowRecord> = (0..n).map(flow).collect();
            let (data, _) = encode_all(&flows);
            assert_eq!(decode_ok(&data), flows, "round trip of {} records", n);
        }
    }

    #[test]
    fn test_round_trip_keeps_optional_fields() {
        let mut f = flow(1);
        f.client_addr = Some("127.0.0.1:50000".parse().unwrap());
        f.server_addr = Some("[2001:db8::1]:443".parse().unwrap());
        f.request.body = Some(Vec::new());
        f.error = Some(FlowError {
            msg: "kept verbatim by the codec".to_string(),
        });

        let data = encode(&f).unwrap();
        assert_eq!(decode_ok(&data), vec![f]);
    }

    #[test]
    fn test_truncation_keeps_complete_prefix() {
        let flows: Vec<FlowRecord> = (0..20).map(flow).collect();
        let (data, ends) = encode_all(&flows);

        for cut in 0..data.len() {
            let complete = ends.iter().filter(|&&end| end <= cut).count();
            let mut stream = decode_stream(&data[..cut]);
            let decoded: Vec<FlowRecord> = stream.by_ref().map(|r| r.unwrap()).collect();

            assert_eq!(decoded.len(), complete, "cut at {}", cut);
            assert_eq!(decoded[..], flows[..complete]);
            let boundary = if complete == 0 { 0 } else { ends[complete - 1] };
            assert_eq!(stream.valid_len(), boundary);
            if cut == boundary {
                assert_eq!(stream.torn_tail(), None);
            } else {
                assert_eq!(stream.torn_tail(), Some(boundary));
            }
        }
    }

    #[test]
    fn test_checksum_mismatch_is_reported() {
        let flows: Vec<FlowRecord> = (0..3).map(flow).collect();
        let (mut data, ends) = encode_all(&flows);
        // Flip a payload byte inside the second frame
        data[ends[0] + FRAME_HEADER_SIZE + 2] ^= 0xff;

        let items: Vec<_> = decode_stream(&data).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &flows[0]);
        match &items[1] {
            Err(CodecError::Corrupt {
                offset,
                reason: CorruptReason::Checksum { .. },
            }) => assert_eq!(*offset, ends[0]),
            other => panic!("expected checksum error, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_magic_is_reported() {
        let mut data = encode(&flow(0)).unwrap();
        data[0] = b'X';

        let report = scan(&data);
        assert_eq!(report.records, 0);
        assert_eq!(report.valid_len, 0);
        assert!(matches!(
            report.corruption,
            Some(CodecError::Corrupt {
                reason: CorruptReason::BadMagic,
                ..
            })
        ));
    }

    #[test]
    fn test_oversize_length_is_corrupt_not_torn() {
        let mut data = encode(&flow(0)).unwrap();
        data[4..8].copy_from_slice(&u32::MAX.to_le_bytes());

        let report = scan(&data);
        assert!(matches!(
            report.corruption,
            Some(CodecError::Corrupt {
                reason: CorruptReason::Oversize(_),
                ..
            })
        ));
        assert_eq!(report.torn_tail, None);
    }

    #[test]
    fn test_scan_report() {
        let flows: Vec<FlowRecord> = (0..4).map(flow).collect();
        let (data, ends) = encode_all(&flows);

        let clean = scan(&data);
        assert!(clean.is_clean());
        assert_eq!(clean.records, 4);
        assert_eq!(clean.valid_len, data.len());

        let torn = scan(&data[..data.len() - 3]);
        assert!(!torn.is_clean());
        assert_eq!(torn.records, 3);
        assert_eq!(torn.torn_tail, Some(ends[2]));
        assert_eq!(torn.trailing_bytes(), data.len() - 3 - ends[2]);
    }

    #[test]
    fn test_scan_reader_matches_slice_scan() {
        let flows: Vec<FlowRecord> = (0..5).map(flow).collect();
        let (data, ends) = encode_all(&flows);
        let mut corrupt = data.clone();
        corrupt[ends[1] + FRAME_HEADER_SIZE] ^= 0x55;

        for bytes in [&data[..], &data[..data.len() - 7], &data[..ends[2] + 5], &corrupt[..]] {
            let from_slice = scan(bytes);
            let from_reader = scan_reader(io::BufReader::new(bytes)).unwrap();

            assert_eq!(from_reader.records, from_slice.records);
            assert_eq!(from_reader.valid_len, from_slice.valid_len);
            assert_eq!(from_reader.total_len, bytes.len());
            assert_eq!(from_reader.torn_tail, from_slice.torn_tail);
            assert_eq!(
                from_reader.corruption.map(|e| e.to_string()),
                from_slice.corruption.map(|e| e.to_string())
            );
        }
    }

    #[test]
    fn test_scan_reader_torn_length_claim() {
        // Header promising a large payload that never arrived
        let mut data = encode(&flow(1)).unwrap();
        let mut torn = encode(&flow(2)).unwrap();
        torn[4..8].copy_from_slice(&(MAX_RECORD_SIZE as u32).to_le_bytes());
        torn.truncate(FRAME_HEADER_SIZE + 10);
        let first_len = data.len();
        data.extend(torn);

        let report = scan_reader(&data[..]).unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.torn_tail, Some(first_len));
        assert!(report.corruption.is_none());
    }
}
