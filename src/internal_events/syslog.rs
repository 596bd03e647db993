use std::time::Duration;

use metrics::counter;

use super::{InternalEvent, error_stage};
use crate::sinks::syslog::{DeliveryError, DeliveryErrorKind};

#[derive(Debug)]
pub struct DeliveryRetrying {
    pub kind: DeliveryErrorKind,
    pub attempt: usize,
    pub max_retries: usize,
    pub delay: Duration,
    pub sent_count: usize,
}

impl InternalEvent for DeliveryRetrying {
    fn emit(self) {
        warn!(
            message = "Retrying delivery after error.",
            error_kind = %self.kind,
            attempt = self.attempt,
            max_retries = self.max_retries,
            delay_ms = self.delay.as_millis() as u64,
            sent_count = self.sent_count,
        );
        counter!("delivery_retries_total", "error_kind" => self.kind.as_str()).increment(1);
    }
}

#[derive(Debug)]
pub struct DeliveryFailed<'a> {
    pub error: &'a DeliveryError,
    pub total: usize,
}

impl InternalEvent for DeliveryFailed<'_> {
    fn emit(self) {
        let unsent = self.total.saturating_sub(self.error.sent_count());
        error!(
            message = "Giving up on delivery.",
            error = %self.error,
            error_kind = %self.error.kind(),
            sent_count = self.error.sent_count(),
            total = self.total,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_discarded_events_total",
            "error_kind" => self.error.kind().as_str(),
        )
        .increment(unsent as u64);
    }
}

#[derive(Debug)]
pub struct DeliveryCancelled {
    pub sent_count: usize,
    pub total: usize,
}

impl InternalEvent for DeliveryCancelled {
    fn emit(self) {
        warn!(
            message = "Delivery cancelled by invocation deadline.",
            sent_count = self.sent_count,
            total = self.total,
        );
        counter!("delivery_cancelled_total").increment(1);
    }
}
