use std::time::Duration;

/// How a delivery recovers from I/O errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySettings {
    /// Reconnect attempts after the first attempt fails. Zero disables
    /// retrying altogether.
    pub max_retries: usize,

    /// Delay before the first retry. Each further retry doubles it.
    pub backoff_base: Duration,

    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl RetrySettings {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::from_duration(self.backoff_base)
            .factor(2)
            .max_delay(self.max_backoff)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// An endless sequence of growing delays: `base`, `base * factor`,
/// `base * factor^2`, and so on, each capped at `max_delay`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    current: Duration,
    factor: u32,
    max_delay: Duration,
}

impl ExponentialBackoff {
    pub const fn from_duration(base: Duration) -> Self {
        Self {
            base,
            current: base,
            factor: 2,
            max_delay: Duration::MAX,
        }
    }

    pub const fn factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    pub const fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Starts the sequence over from `base`.
    pub const fn reset(&mut self) {
        self.current = self.base;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current.min(self.max_delay);
        self.current = self
            .current
            .checked_mul(self.factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let backoff = RetrySettings {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        }
        .backoff();

        let delays: Vec<_> = backoff.take(5).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = ExponentialBackoff::from_duration(Duration::from_millis(10));
        backoff.next();
        backoff.next();
        assert_eq!(backoff.next(), Some(Duration::from_millis(40)));

        backoff.reset();
        assert_eq!(backoff.next(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn never_overflows() {
        let mut backoff = ExponentialBackoff::from_duration(Duration::from_secs(u64::MAX / 2 + 1));
        backoff.next();
        assert_eq!(backoff.next(), Some(Duration::MAX));
        assert_eq!(backoff.next(), Some(Duration::MAX));
    }

    #[test]
    fn zero_base_never_waits() {
        let backoff = ExponentialBackoff::from_duration(Duration::ZERO);
        assert!(backoff.take(3).all(|delay| delay.is_zero()));
    }
}
