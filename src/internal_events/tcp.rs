use std::net::SocketAddr;

use metrics::counter;

use super::{InternalEvent, error_stage, error_type, io_error_code};
use crate::sinks::util::tcp::ConnectError;

#[derive(Debug)]
pub struct TcpConnectionEstablished {
    pub peer_addr: Option<SocketAddr>,
}

impl InternalEvent for TcpConnectionEstablished {
    fn emit(self) {
        if let Some(peer_addr) = self.peer_addr {
            debug!(message = "Connected.", %peer_addr);
        } else {
            debug!(message = "Connected.", peer_addr = "unknown");
        }
        counter!("connection_established_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionFailed<'a> {
    pub error: &'a ConnectError,
}

impl InternalEvent for TcpConnectionFailed<'_> {
    fn emit(self) {
        error!(
            message = "Unable to connect.",
            error = %self.error,
            error_code = "failed_connecting",
            error_type = error_type::CONNECTION_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "failed_connecting",
            "error_type" => error_type::CONNECTION_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionTimedOut {
    pub timeout_secs: f64,
}

impl InternalEvent for TcpConnectionTimedOut {
    fn emit(self) {
        error!(
            message = "Timed out connecting.",
            timeout_secs = self.timeout_secs,
            error_code = "connect_timeout",
            error_type = error_type::TIMED_OUT,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "connect_timeout",
            "error_type" => error_type::TIMED_OUT,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionShutdown;

impl InternalEvent for TcpConnectionShutdown {
    fn emit(self) {
        warn!(message = "Received EOF from the collector, connection is closed.");
        counter!("connection_shutdown_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpConnectionClosed;

impl InternalEvent for TcpConnectionClosed {
    fn emit(self) {
        debug!(message = "Closed connection.");
        counter!("connection_closed_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpCloseFailed<'a> {
    pub error: Option<&'a std::io::Error>,
}

impl InternalEvent for TcpCloseFailed<'_> {
    fn emit(self) {
        match self.error {
            Some(error) => debug!(message = "Unable to close connection cleanly.", %error),
            None => debug!(message = "Timed out closing connection."),
        }
        counter!("connection_close_errors_total", "mode" => "tcp").increment(1);
    }
}

#[derive(Debug)]
pub struct TcpSendError<'a> {
    pub error: &'a std::io::Error,
}

impl InternalEvent for TcpSendError<'_> {
    fn emit(self) {
        let error_code = io_error_code(self.error);
        error!(
            message = "Unable to write line.",
            error = %self.error,
            error_code = error_code,
            error_type = error_type::WRITER_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => error_code,
            "error_type" => error_type::WRITER_FAILED,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpSendTimedOut {
    pub timeout_secs: f64,
}

impl InternalEvent for TcpSendTimedOut {
    fn emit(self) {
        error!(
            message = "Timed out writing line.",
            timeout_secs = self.timeout_secs,
            error_code = "write_timeout",
            error_type = error_type::TIMED_OUT,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_code" => "write_timeout",
            "error_type" => error_type::TIMED_OUT,
            "stage" => error_stage::SENDING,
            "mode" => "tcp",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct TcpBytesSent {
    pub byte_size: usize,
}

impl InternalEvent for TcpBytesSent {
    fn emit(self) {
        trace!(message = "Line flushed.", byte_size = self.byte_size);
        counter!("component_sent_events_total", "mode" => "tcp").increment(1);
        counter!("component_sent_bytes_total", "mode" => "tcp").increment(self.byte_size as u64);
    }
}
