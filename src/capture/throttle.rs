use std::time::{Duration, Instant};

/// Minimum-interval gate for frame submissions.
///
/// The gate is marked when a submission *starts*, so a slow or failing
/// round-trip still counts against the interval.
#[derive(Clone, Debug)]
pub struct ThrottleGate {
    interval: Duration,
    last_submit: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_submit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_submit(&self) -> Option<Instant> {
        self.last_submit
    }

    pub fn ready(&self, now: Instant) -> bool {
        match self.last_submit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last_submit = Some(now);
    }

    /// `ready` and `mark` in one step.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.mark(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_submission_is_always_allowed() {
        let gate = ThrottleGate::new(Duration::from_secs(5));
        assert!(gate.ready(Instant::now()));
    }

    #[test]
    fn gate_opens_exactly_at_interval() {
        let start = Instant::now();
        let mut gate = ThrottleGate::new(Duration::from_secs(5));
        assert!(gate.try_acquire(start));
        assert!(!gate.try_acquire(start + Duration::from_millis(4_999)));
        assert!(gate.try_acquire(start + Duration::from_secs(5)));
        assert_eq!(gate.last_submit(), Some(start + Duration::from_secs(5)));
    }

    #[test]
    fn refused_attempts_do_not_move_the_mark() {
        let start = Instant::now();
        let mut gate = ThrottleGate::new(Duration::from_secs(1));
        gate.mark(start);
        for ms in [100, 500, 900] {
            assert!(!gate.try_acquire(start + Duration::from_millis(ms)));
        }
        assert_eq!(gate.last_submit(), Some(start));
    }

    #[test]
    fn zero_interval_never_throttles() {
        let now = Instant::now();
        let mut gate = ThrottleGate::new(Duration::ZERO);
        assert!(gate.try_acquire(now));
        assert!(gate.try_acquire(now));
    }
}
