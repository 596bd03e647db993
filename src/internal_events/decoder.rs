use metrics::counter;

use super::{InternalEvent, error_stage, error_type};
use crate::{codecs::decoding::DecodeError, event::MessageType};

#[derive(Debug)]
pub struct EnvelopeDecoded<'a> {
    pub log_group: &'a str,
    pub log_stream: &'a str,
    pub message_type: MessageType,
    pub count: usize,
    pub byte_size: usize,
}

impl InternalEvent for EnvelopeDecoded<'_> {
    fn emit(self) {
        debug!(
            message = "Decoded log batch.",
            log_group = %self.log_group,
            log_stream = %self.log_stream,
            message_type = %self.message_type,
            count = self.count,
            byte_size = self.byte_size,
        );
        counter!("component_received_events_total").increment(self.count as u64);
        counter!("component_received_bytes_total").increment(self.byte_size as u64);
    }
}

#[derive(Debug)]
pub struct EnvelopeDecodeError<'a> {
    pub error: &'a DecodeError,
}

impl InternalEvent for EnvelopeDecodeError<'_> {
    fn emit(self) {
        let stage = self.error.stage().as_str();
        error!(
            message = "Failed decoding envelope, nothing will be delivered.",
            error = %self.error,
            error_code = stage,
            error_type = error_type::PARSER_FAILED,
            stage = error_stage::RECEIVING,
        );
        counter!(
            "component_errors_total",
            "error_code" => stage,
            "error_type" => error_type::PARSER_FAILED,
            "stage" => error_stage::RECEIVING,
        )
        .increment(1);
    }
}
