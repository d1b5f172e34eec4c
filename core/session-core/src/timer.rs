//! Repeating timer checked on poll.

#[derive(Debug, Clone)]
pub struct IntervalTimer {
    period_ms: i64,
    next_due: Option<i64>,
}

impl IntervalTimer {
    /// Armed; first fires one period after `now_ms`.
    pub fn start(period_ms: i64, now_ms: i64) -> Self {
        Self {
            period_ms,
            next_due: Some(now_ms + period_ms),
        }
    }

    /// Fires at most once per call, however many periods were missed, and
    /// reschedules one period after `now_ms`.
    pub fn fire_if_due(&mut self, now_ms: i64) -> bool {
        match self.next_due {
            Some(due) if now_ms >= due => {
                self.next_due = Some(now_ms + self.period_ms);
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<i64> {
        self.next_due
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let mut timer = IntervalTimer::start(1_000, 0);
        assert!(!timer.fire_if_due(999));
        assert!(timer.fire_if_due(1_000));
        assert!(!timer.fire_if_due(1_500));
        assert!(timer.fire_if_due(2_000));
    }

    #[test]
    fn missed_periods_collapse() {
        let mut timer = IntervalTimer::start(1_000, 0);
        assert!(timer.fire_if_due(10_000));
        assert!(!timer.fire_if_due(10_500));
        assert_eq!(timer.deadline(), Some(11_000));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timer = IntervalTimer::start(1_000, 0);
        timer.cancel();
        assert!(!timer.is_active());
        assert!(!timer.fire_if_due(5_000));
    }
}
