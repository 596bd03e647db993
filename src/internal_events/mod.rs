macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::InternalEvent::emit($event)
    };
}

mod decoder;
mod forwarder;
mod pool;
mod syslog;
mod tcp;

pub use self::decoder::*;
pub use self::forwarder::*;
pub use self::pool::*;
pub use self::syslog::*;
pub use self::tcp::*;

/// An observable step of the bridge.
///
/// Emitting an event writes its log record and updates its metrics in one go, so
/// that call sites never log without counting (or the other way around).
pub trait InternalEvent: Sized {
    fn emit(self);
}

pub mod error_stage {
    pub const RECEIVING: &str = "receiving";
    pub const SENDING: &str = "sending";
}

pub mod error_type {
    pub const CONNECTION_FAILED: &str = "connection_failed";
    pub const PARSER_FAILED: &str = "parser_failed";
    pub const TIMED_OUT: &str = "timed_out";
    pub const WRITER_FAILED: &str = "writer_failed";
}

pub(crate) fn io_error_code(error: &std::io::Error) -> &'static str {
    use std::io::ErrorKind::*;

    match error.kind() {
        AddrInUse => "address_in_use",
        AddrNotAvailable => "address_not_available",
        BrokenPipe => "broken_pipe",
        ConnectionAborted => "connection_aborted",
        ConnectionRefused => "connection_refused",
        ConnectionReset => "connection_reset",
        Interrupted => "operation_interrupted",
        InvalidData => "invalid_data",
        InvalidInput => "invalid_input_parameter",
        NotConnected => "not_connected",
        NotFound => "entity_not_found",
        Other => "other_error",
        PermissionDenied => "permission_denied",
        TimedOut => "timed_out",
        UnexpectedEof => "unexpected_end_of_file",
        WouldBlock => "operation_would_block",
        WriteZero => "write_zero",
        _ => "unknown",
    }
}
