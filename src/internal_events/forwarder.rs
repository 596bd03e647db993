use std::time::Duration;

use metrics::{counter, histogram};

use super::InternalEvent;
use crate::handler::InvocationError;

#[derive(Debug)]
pub struct InvocationCompleted {
    pub delivered: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl InternalEvent for InvocationCompleted {
    fn emit(self) {
        info!(
            message = "Forwarded log batch.",
            delivered = self.delivered,
            total = self.total,
            elapsed_ms = self.elapsed.as_millis() as u64,
        );
        counter!("invocations_total", "outcome" => "success").increment(1);
        histogram!("invocation_duration_seconds").record(self.elapsed);
    }
}

#[derive(Debug)]
pub struct InvocationFailed<'a> {
    pub error: &'a InvocationError,
    pub delivered: usize,
    pub total: usize,
    pub elapsed: Duration,
}

impl InternalEvent for InvocationFailed<'_> {
    fn emit(self) {
        error!(
            message = "Failed forwarding log batch.",
            error_kind = %self.error.kind,
            error = %self.error.message,
            delivered = self.delivered,
            total = self.total,
            elapsed_ms = self.elapsed.as_millis() as u64,
        );
        counter!(
            "invocations_total",
            "outcome" => "failure",
            "error_kind" => self.error.kind.as_str(),
        )
        .increment(1);
        histogram!("invocation_duration_seconds").record(self.elapsed);
    }
}

#[derive(Debug)]
pub struct ControlMessageSkipped<'a> {
    pub owner: &'a str,
}

impl InternalEvent for ControlMessageSkipped<'_> {
    fn emit(self) {
        debug!(message = "Skipping CloudWatch Logs control message.", owner = %self.owner);
        counter!("control_messages_total").increment(1);
    }
}
