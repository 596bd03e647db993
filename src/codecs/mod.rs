//! Byte-level codecs: envelope decoding, syslog rendering and wire framing.

pub mod decoding;
pub mod framing;
pub mod syslog;

pub use self::decoding::{DecodeError, DecodeStage, decode};
pub use self::framing::NewlineDelimitedEncoder;
pub use self::syslog::{AppNameSource, Facility, Severity, SyslogSerializer, SyslogSerializerConfig};
