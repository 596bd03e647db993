use std::fmt;

use bytes::Bytes;
use serde::Deserialize;

/// Kind of payload carried by a CloudWatch Logs subscription envelope.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Regular log data.
    #[default]
    DataMessage,
    /// Health probe sent by CloudWatch Logs when a subscription is set up.
    ControlMessage,
}

impl MessageType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DataMessage => "DATA_MESSAGE",
            Self::ControlMessage => "CONTROL_MESSAGE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source log line.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LogEvent {
    /// Source-assigned identifier, unique within a batch.
    #[serde(default)]
    pub id: String,

    /// Epoch milliseconds assigned by the source. Advisory only: the syslog
    /// line carries the time the line was rendered.
    pub timestamp: i64,

    /// Raw message content, possibly spanning several lines.
    pub message: Bytes,
}

/// One decoded envelope.
///
/// A batch lives for exactly one invocation: the decoder builds it, the
/// handler renders every event of it, then it is dropped.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    #[serde(default)]
    pub message_type: MessageType,

    /// Originating account.
    pub owner: String,

    /// Source namespace, rendered as the syslog HOSTNAME.
    pub log_group: String,

    /// Source sub-namespace, rendered as the syslog APP-NAME.
    pub log_stream: String,

    #[serde(default)]
    pub subscription_filters: Vec<String>,

    /// Events in source order. The order is significant end to end.
    #[serde(rename = "logEvents")]
    pub events: Vec<LogEvent>,
}

impl LogBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_control_message(&self) -> bool {
        self.message_type == MessageType::ControlMessage
    }
}
