use std::{borrow::Cow, fmt, io::Read};

use base64::prelude::{BASE64_STANDARD, Engine as _};
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::event::LogBatch;

/// Upper bound on the size of a decompressed envelope.
///
/// CloudWatch Logs caps a subscription payload at 1 MiB compressed; anything
/// inflating past this is rejected rather than buffered.
pub const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The step of decoding that rejected an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStage {
    Decompress,
    Parse,
    Validate,
}

impl DecodeStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decompress => "decompress",
            Self::Parse => "parse",
            Self::Validate => "validate",
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("Envelope is empty."))]
    EmptyEnvelope,

    #[snafu(display("Could not base64 decode envelope data: {}", source))]
    Base64 { source: base64::DecodeError },

    #[snafu(display("Could not decompress envelope data as {}: {}", compression, source))]
    Decompression {
        source: std::io::Error,
        compression: Compression,
    },

    #[snafu(display(
        "Decompressed envelope exceeds the limit of {} bytes.",
        MAX_DECOMPRESSED_BYTES
    ))]
    TooLarge,

    #[snafu(display("Could not parse invocation payload: {}", source))]
    Wrapper { source: serde_json::Error },

    #[snafu(display("Could not parse log batch: {}", source))]
    Parse { source: serde_json::Error },

    #[snafu(display(
        "Log batch for log group {:?}, log stream {:?} contains no events.",
        log_group,
        log_stream
    ))]
    NoEvents {
        log_group: String,
        log_stream: String,
    },
}

impl DecodeError {
    pub const fn stage(&self) -> DecodeStage {
        match self {
            Self::EmptyEnvelope | Self::Base64 { .. } | Self::Decompression { .. } | Self::TooLarge => {
                DecodeStage::Decompress
            }
            Self::Wrapper { .. } | Self::Parse { .. } => DecodeStage::Parse,
            Self::NoEvents { .. } => DecodeStage::Validate,
        }
    }
}

/// Compression scheme of the inner payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
    Deflate,
}

impl Compression {
    /// Infers the scheme from the leading bytes of `data`.
    ///
    /// Gzip and zlib carry recognizable headers; anything else is assumed to be
    /// a raw deflate stream.
    pub fn detect(data: &[u8]) -> Self {
        match data {
            [a, b, ..] if [*a, *b] == GZIP_MAGIC => Self::Gzip,
            [cmf, flg, ..] if is_zlib_header(*cmf, *flg) => Self::Zlib,
            _ => Self::Deflate,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Deflate => "deflate",
        })
    }
}

// RFC 1950 section 2.2: CM must be 8 (deflate) and CMF*256 + FLG a multiple of 31.
fn is_zlib_header(cmf: u8, flg: u8) -> bool {
    cmf & 0x0f == 8 && cmf >> 4 <= 7 && (u16::from(cmf) << 8 | u16::from(flg)) % 31 == 0
}

/// The JSON document a Lambda runtime hands over for a CloudWatch Logs trigger.
#[derive(Debug, Deserialize)]
struct InvocationPayload {
    awslogs: AwsLogs,
}

#[derive(Debug, Deserialize)]
struct AwsLogs {
    data: String,
}

/// Decodes one envelope into a log batch.
///
/// The envelope may be the raw compressed bytes, the base64 text of them, or
/// the invocation JSON `{"awslogs": {"data": "<base64>"}}`. Nothing is
/// returned unless the whole envelope decodes, so callers never act on a
/// partial batch.
pub fn decode(raw: &[u8]) -> Result<LogBatch, DecodeError> {
    let compressed = unwrap_envelope(raw)?;
    let compression = Compression::detect(&compressed);
    let json = decompress(&compressed, compression)?;

    let batch: LogBatch = serde_json::from_slice(&json).context(ParseSnafu)?;

    if batch.is_empty() {
        return NoEventsSnafu {
            log_group: batch.log_group,
            log_stream: batch.log_stream,
        }
        .fail();
    }

    Ok(batch)
}

fn unwrap_envelope(raw: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return EmptyEnvelopeSnafu.fail();
    }

    if trimmed.starts_with(b"{") {
        let payload: InvocationPayload = serde_json::from_slice(trimmed).context(WrapperSnafu)?;
        return decode_base64(payload.awslogs.data.as_bytes()).map(Cow::Owned);
    }

    if trimmed.starts_with(&GZIP_MAGIC) || looks_binary(trimmed) {
        return Ok(Cow::Borrowed(raw));
    }

    decode_base64(trimmed).map(Cow::Owned)
}

fn looks_binary(data: &[u8]) -> bool {
    !data
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=') || b.is_ascii_whitespace())
}

fn decode_base64(text: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let compact: Vec<u8> = text
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let buf = BASE64_STANDARD.decode(compact).context(Base64Snafu)?;
    if buf.is_empty() {
        return EmptyEnvelopeSnafu.fail();
    }
    Ok(buf)
}

fn decompress(data: &[u8], compression: Compression) -> Result<Vec<u8>, DecodeError> {
    let reader: Box<dyn Read + '_> = match compression {
        Compression::Gzip => Box::new(MultiGzDecoder::new(data)),
        Compression::Zlib => Box::new(ZlibDecoder::new(data)),
        Compression::Deflate => Box::new(DeflateDecoder::new(data)),
    };

    let mut decoded = Vec::new();
    reader
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut decoded)
        .context(DecompressionSnafu { compression })?;

    if decoded.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return TooLargeSnafu.fail();
    }

    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use bytes::Bytes;
    use flate2::{
        Compression as Level,
        write::{DeflateEncoder, GzEncoder, ZlibEncoder},
    };
    use serde_json::json;

    use super::*;
    use crate::event::{LogEvent, MessageType};

    fn payload() -> serde_json::Value {
        json!({
            "messageType": "DATA_MESSAGE",
            "owner": "123456789012",
            "logGroup": "/aws/lambda/app",
            "logStream": "2024/01/01/[$LATEST]abcdef",
            "subscriptionFilters": ["to-syslog"],
            "logEvents": [
                {"id": "1", "timestamp": 1_700_000_000_000i64, "message": "first"},
                {"id": "2", "timestamp": 1_700_000_000_001i64, "message": "second\nline"},
                {"id": "3", "timestamp": 1_700_000_000_002i64, "message": "third"},
            ]
        })
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Level::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gzip_json(value: &serde_json::Value) -> Vec<u8> {
        gzip(&serde_json::to_vec(value).unwrap())
    }

    fn assert_stage(result: Result<LogBatch, DecodeError>, stage: DecodeStage) {
        match result {
            Err(error) => assert_eq!(error.stage(), stage, "unexpected error: {error}"),
            Ok(batch) => panic!("expected a {stage} failure, decoded {batch:?}"),
        }
    }

    #[test]
    fn decodes_binary_gzip() {
        let batch = decode(&gzip_json(&payload())).unwrap();

        assert_eq!(batch.message_type, MessageType::DataMessage);
        assert_eq!(batch.owner, "123456789012");
        assert_eq!(batch.log_group, "/aws/lambda/app");
        assert_eq!(batch.log_stream, "2024/01/01/[$LATEST]abcdef");
        assert_eq!(batch.subscription_filters, vec!["to-syslog".to_string()]);
        assert_eq!(
            batch.events,
            vec![
                LogEvent {
                    id: "1".into(),
                    timestamp: 1_700_000_000_000,
                    message: Bytes::from_static(b"first"),
                },
                LogEvent {
                    id: "2".into(),
                    timestamp: 1_700_000_000_001,
                    message: Bytes::from_static(b"second\nline"),
                },
                LogEvent {
                    id: "3".into(),
                    timestamp: 1_700_000_000_002,
                    message: Bytes::from_static(b"third"),
                },
            ]
        );
    }

    #[test]
    fn decodes_base64_text() {
        let encoded = BASE64_STANDARD.encode(gzip_json(&payload()));
        let batch = decode(format!("{encoded}\n").as_bytes()).unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn decodes_invocation_payload() {
        let encoded = BASE64_STANDARD.encode(gzip_json(&payload()));
        let invocation = json!({ "awslogs": { "data": encoded } });

        let batch = decode(&serde_json::to_vec(&invocation).unwrap()).unwrap();
        assert_eq!(batch.log_group, "/aws/lambda/app");
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn decodes_zlib_and_raw_deflate() {
        let json = serde_json::to_vec(&payload()).unwrap();

        let mut zlib = ZlibEncoder::new(Vec::new(), Level::default());
        zlib.write_all(&json).unwrap();
        let zlib = zlib.finish().unwrap();
        assert_eq!(Compression::detect(&zlib), Compression::Zlib);
        assert_eq!(decode(&zlib).unwrap().len(), 3);

        let mut deflate = DeflateEncoder::new(Vec::new(), Level::default());
        deflate.write_all(&json).unwrap();
        let deflate = BASE64_STANDARD.encode(deflate.finish().unwrap());
        assert_eq!(decode(deflate.as_bytes()).unwrap().len(), 3);
    }

    #[test]
    fn decodes_concatenated_gzip_members() {
        let json = serde_json::to_vec(&payload()).unwrap();
        let (head, tail) = json.split_at(json.len() / 2);
        let mut data = gzip(head);
        data.extend(gzip(tail));

        assert_eq!(decode(&data).unwrap().len(), 3);
    }

    #[test]
    fn preserves_event_order() {
        let events: Vec<_> = (0..100)
            .map(|i| json!({"id": i.to_string(), "timestamp": i, "message": format!("line {i}")}))
            .collect();
        let value = json!({
            "owner": "o", "logGroup": "g", "logStream": "s", "logEvents": events
        });

        let batch = decode(&gzip_json(&value)).unwrap();
        for (i, event) in batch.events.iter().enumerate() {
            assert_eq!(event.message, Bytes::from(format!("line {i}")));
        }
    }

    #[test]
    fn decodes_control_message() {
        let value = json!({
            "messageType": "CONTROL_MESSAGE",
            "owner": "CloudwatchLogs",
            "logGroup": "",
            "logStream": "",
            "subscriptionFilters": [],
            "logEvents": [{
                "id": "",
                "timestamp": 1_700_000_000_000i64,
                "message": "CWL CONTROL MESSAGE: Checking health of destination."
            }]
        });

        let batch = decode(&gzip_json(&value)).unwrap();
        assert!(batch.is_control_message());
    }

    #[test]
    fn rejects_empty_envelope() {
        assert_stage(decode(b""), DecodeStage::Decompress);
        assert_stage(decode(b"  \n"), DecodeStage::Decompress);
    }

    #[test]
    fn rejects_bad_base64() {
        let error = decode(b"bm90IGJhc2U2N").unwrap_err();
        assert!(matches!(error, DecodeError::Base64 { .. }));
        assert_eq!(error.stage(), DecodeStage::Decompress);
    }

    #[test]
    fn rejects_garbage() {
        assert_stage(decode(b"not an envelope!!"), DecodeStage::Decompress);
    }

    #[test]
    fn rejects_corrupt_compression() {
        let mut data = gzip_json(&payload());
        data.truncate(data.len() / 2);
        assert_stage(decode(&data), DecodeStage::Decompress);
    }

    #[test]
    fn rejects_malformed_json() {
        assert_stage(decode(&gzip(b"{\"owner\": ")), DecodeStage::Parse);
        assert_stage(decode(&gzip(b"[1, 2, 3]")), DecodeStage::Parse);
    }

    #[test]
    fn rejects_missing_events_field() {
        let value = json!({"owner": "o", "logGroup": "g", "logStream": "s"});
        assert_stage(decode(&gzip_json(&value)), DecodeStage::Parse);
    }

    #[test]
    fn rejects_malformed_invocation_payload() {
        assert_stage(decode(br#"{"records": []}"#), DecodeStage::Parse);
    }

    #[test]
    fn rejects_empty_events() {
        let value = json!({
            "owner": "o", "logGroup": "g", "logStream": "s", "logEvents": []
        });

        let error = decode(&gzip_json(&value)).unwrap_err();
        assert_eq!(error.stage(), DecodeStage::Validate);
        assert!(matches!(error, DecodeError::NoEvents { .. }));
    }
}
