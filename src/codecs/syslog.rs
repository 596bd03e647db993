use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer};
use strum::{EnumString, FromRepr, VariantNames};

use crate::{
    clock::Clock,
    event::{LogBatch, LogEvent},
};

const NIL_VALUE: &[u8] = b"-";
const SYSLOG_V1: &[u8] = b"1";

/// Config used to build a `SyslogSerializer`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyslogSerializerConfig {
    /// Syslog facility, by name or number.
    pub facility: Facility,

    /// Syslog severity, by name or number.
    pub severity: Severity,

    /// Where the APP-NAME header field is taken from.
    pub app_name: AppNameSource,
}

impl SyslogSerializerConfig {
    /// Build the `SyslogSerializer` from this configuration.
    pub fn build(&self) -> SyslogSerializer {
        SyslogSerializer::new(self)
    }
}

/// Source of the APP-NAME header field.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppNameSource {
    /// The full log stream name.
    #[default]
    LogStream,

    /// The log stream name up to its first `/`.
    ///
    /// Lambda log streams look like `2024/01/01/[$LATEST]abcdef`, so this
    /// keeps only the leading segment.
    LogStreamPrefix,
}

impl AppNameSource {
    fn resolve(self, log_stream: &str) -> &str {
        match self {
            Self::LogStream => log_stream,
            Self::LogStreamPrefix => log_stream
                .split_once('/')
                .map_or(log_stream, |(prefix, _)| prefix),
        }
    }
}

/// Renders log events as RFC 5424 lines.
///
/// Every line has the shape `<PRI>1 TIMESTAMP HOSTNAME APP-NAME - - - MSG`,
/// with the log group as HOSTNAME and the log stream as APP-NAME. The output
/// never contains a line terminator; framing is added when the line is written.
#[derive(Clone, Debug)]
pub struct SyslogSerializer {
    pri: Pri,
    app_name: AppNameSource,
}

impl SyslogSerializer {
    pub fn new(config: &SyslogSerializerConfig) -> Self {
        Self {
            pri: Pri {
                facility: config.facility,
                severity: config.severity,
            },
            app_name: config.app_name,
        }
    }

    /// Encodes one event of `batch`, stamped with the current time of `clock`.
    pub fn encode(&self, batch: &LogBatch, event: &LogEvent, clock: &dyn Clock) -> Bytes {
        let mut buffer = BytesMut::with_capacity(64 + batch.log_group.len() + event.message.len());
        self.encode_at(batch, event, clock.now(), &mut buffer);
        buffer.freeze()
    }

    /// Encodes every event of `batch` in order. All lines share one timestamp.
    pub fn encode_batch(&self, batch: &LogBatch, clock: &dyn Clock) -> Vec<Bytes> {
        let now = clock.now();
        let mut buffer = BytesMut::new();
        batch
            .events
            .iter()
            .map(|event| {
                self.encode_at(batch, event, now, &mut buffer);
                buffer.split().freeze()
            })
            .collect()
    }

    fn encode_at(
        &self,
        batch: &LogBatch,
        event: &LogEvent,
        now: DateTime<Utc>,
        buffer: &mut BytesMut,
    ) {
        self.pri.encode(buffer);
        buffer.put_slice(SYSLOG_V1);
        buffer.put_u8(b' ');
        buffer.put_slice(now.to_rfc3339_opts(SecondsFormat::Millis, true).as_bytes());
        buffer.put_u8(b' ');
        put_header_field(buffer, &batch.log_group);
        buffer.put_u8(b' ');
        put_header_field(buffer, self.app_name.resolve(&batch.log_stream));

        // PROCID, MSGID and STRUCTURED-DATA are always nil.
        for _ in 0..3 {
            buffer.put_u8(b' ');
            buffer.put_slice(NIL_VALUE);
        }
        buffer.put_u8(b' ');
        put_message(buffer, &event.message);
    }
}

// Header fields are space delimited, so an empty value becomes the nil value
// and embedded whitespace is replaced.
fn put_header_field(buffer: &mut BytesMut, value: &str) {
    if value.is_empty() {
        buffer.put_slice(NIL_VALUE);
        return;
    }
    for c in value.chars() {
        let c = if c.is_whitespace() { '_' } else { c };
        let mut utf8 = [0; 4];
        buffer.put_slice(c.encode_utf8(&mut utf8).as_bytes());
    }
}

// One event must stay one line on the wire. Other bytes, valid UTF-8 or not,
// are copied as they are.
fn put_message(buffer: &mut BytesMut, message: &[u8]) {
    buffer.reserve(message.len());
    for &byte in message {
        buffer.put_u8(match byte {
            b'\n' | b'\r' => b' ',
            other => other,
        });
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Pri {
    facility: Facility,
    severity: Severity,
}

impl Pri {
    // https://datatracker.ietf.org/doc/html/rfc5424#section-6.2.1
    const fn value(self) -> u8 {
        self.facility as u8 * 8 + self.severity as u8
    }

    fn encode(self, buffer: &mut BytesMut) {
        buffer.put_u8(b'<');
        buffer.put_slice(self.value().to_string().as_bytes());
        buffer.put_u8(b'>');
    }
}

/// Syslog facility
#[derive(Default, Debug, EnumString, FromRepr, VariantNames, Copy, Clone, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum Facility {
    Kern = 0,
    User = 1,
    Mail = 2,
    #[default]
    Daemon = 3,
    Auth = 4,
    Syslog = 5,
    Lpr = 6,
    News = 7,
    Uucp = 8,
    Cron = 9,
    Authpriv = 10,
    Ftp = 11,
    Ntp = 12,
    Security = 13,
    Console = 14,
    SolarisCron = 15,
    Local0 = 16,
    Local1 = 17,
    Local2 = 18,
    Local3 = 19,
    Local4 = 20,
    Local5 = 21,
    Local6 = 22,
    Local7 = 23,
}

/// Syslog severity
#[derive(Default, Debug, EnumString, FromRepr, VariantNames, Copy, Clone, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum Severity {
    Emergency = 0,
    Alert = 1,
    Critical = 2,
    Error = 3,
    Warning = 4,
    Notice = 5,
    #[default]
    Informational = 6,
    Debug = 7,
}

impl<'de> Deserialize<'de> for Facility {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_syslog_code(deserializer, "facility", 23, Facility::from_repr)
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_syslog_code(deserializer, "severity", 7, Severity::from_repr)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NameOrCode {
    Code(u64),
    Name(String),
}

fn deserialize_syslog_code<'de, D, T>(
    deserializer: D,
    type_name: &'static str,
    max_value: usize,
    from_repr_fn: fn(usize) -> Option<T>,
) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + VariantNames,
{
    let parsed = match NameOrCode::deserialize(deserializer)? {
        NameOrCode::Code(code) => usize::try_from(code).ok().and_then(from_repr_fn),
        NameOrCode::Name(name) => parse_syslog_code(&name, from_repr_fn),
    };
    parsed.ok_or_else(|| {
        serde::de::Error::custom(format!(
            "Invalid {type_name}. Expected one of {:?} or an integer 0-{max_value}.",
            T::VARIANTS
        ))
    })
}

fn parse_syslog_code<T>(s: &str, from_repr_fn: fn(usize) -> Option<T>) -> Option<T>
where
    T: FromStr,
{
    if let Ok(value_from_name) = s.to_ascii_lowercase().parse::<T>() {
        return Some(value_from_name);
    }
    s.parse::<usize>().ok().and_then(from_repr_fn)
}
