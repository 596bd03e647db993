use metrics::counter;

use super::InternalEvent;

#[derive(Debug)]
pub struct PooledConnectionReused<'a> {
    pub host: &'a str,
    pub port: u16,
}

impl InternalEvent for PooledConnectionReused<'_> {
    fn emit(self) {
        debug!(message = "Reusing pooled connection.", host = %self.host, port = self.port);
        counter!("pool_checkouts_total", "outcome" => "reused").increment(1);
    }
}

#[derive(Debug)]
pub struct PooledConnectionDiscarded<'a> {
    pub host: &'a str,
    pub port: u16,
    pub reason: &'static str,
}

impl InternalEvent for PooledConnectionDiscarded<'_> {
    fn emit(self) {
        debug!(
            message = "Discarding pooled connection.",
            host = %self.host,
            port = self.port,
            reason = self.reason,
        );
        counter!("pool_discarded_total", "reason" => self.reason).increment(1);
    }
}

#[derive(Debug)]
pub struct PooledConnectionReturned;

impl InternalEvent for PooledConnectionReturned {
    fn emit(self) {
        trace!(message = "Returned connection to pool.");
        counter!("pool_checkins_total").increment(1);
    }
}
