use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::transport::Phases;

/// How a single probe ended. Exactly one applies per attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The governing token was cancelled before the exchange finished.
    Canceled,
    /// The per-request deadline elapsed first.
    DeadlineExceeded,
    /// Any other transport failure.
    Failed,
}

impl Outcome {
    /// Classify a failed exchange by the state of its scope, not by the transport error.
    /// Cancellation wins when both have happened.
    pub fn from_failure(canceled: bool, deadline_passed: bool) -> Self {
        if canceled {
            Outcome::Canceled
        } else if deadline_passed {
            Outcome::DeadlineExceeded
        } else {
            Outcome::Failed
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Outcome::Canceled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Outcome::DeadlineExceeded)
    }

    /// Canceled and DeadlineExceeded are refinements of a failure.
    pub fn is_failed(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

/// Timing of one probe attempt. Durations are offsets from the probe start and
/// stay zero for phases that never happened; `occurred` says which ones did.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub start_time: DateTime<Utc>,
    pub dns_start: Duration,
    pub dns_done: Duration,
    pub first_byte: Duration,
    pub last_byte: Duration,
    pub request_written: Duration,
    pub occurred: Phases,
    pub http_status: Option<u16>,
    pub outcome: Outcome,
}

impl TimingRecord {
    pub fn new(
        start_time: DateTime<Utc>,
        phases: Phases,
        last_byte: Option<Duration>,
        http_status: Option<u16>,
        outcome: Outcome,
    ) -> Self {
        TimingRecord {
            start_time,
            dns_start: phases.dns_start.unwrap_or_default(),
            dns_done: phases.dns_done.unwrap_or_default(),
            first_byte: phases.first_byte.unwrap_or_default(),
            last_byte: last_byte.unwrap_or_default(),
            request_written: phases.request_written.unwrap_or_default(),
            occurred: phases,
            http_status,
            outcome,
        }
    }
}

impl fmt::Display for TimingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNSDone: {:?}, TTFB: {:?}, TTLB: {:?}, C: {}, D: {}, F: {}",
            self.dns_done,
            self.first_byte,
            self.last_byte,
            self.outcome.is_canceled(),
            self.outcome.is_deadline_exceeded(),
            self.outcome.is_failed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1136239445, 0).expect("valid timestamp")
    }

    #[test]
    fn test_failure_classification() {
        assert_eq!(Outcome::from_failure(false, false), Outcome::Failed);
        assert_eq!(Outcome::from_failure(true, false), Outcome::Canceled);
        assert_eq!(Outcome::from_failure(false, true), Outcome::DeadlineExceeded);
        assert_eq!(Outcome::from_failure(true, true), Outcome::Canceled);
    }

    #[test]
    fn test_flags_are_exclusive_refinements() {
        assert!(!Outcome::Success.is_failed());
        assert!(Outcome::Failed.is_failed() && !Outcome::Failed.is_canceled());
        assert!(Outcome::Canceled.is_failed() && !Outcome::Canceled.is_deadline_exceeded());
        assert!(Outcome::DeadlineExceeded.is_failed() && !Outcome::DeadlineExceeded.is_canceled());
    }

    #[test]
    fn test_log_line_format() {
        let phases = Phases {
            dns_start: Some(Duration::from_millis(1)),
            dns_done: Some(Duration::from_millis(3)),
            request_written: Some(Duration::from_millis(4)),
            first_byte: Some(Duration::from_millis(10)),
        };
        let record = TimingRecord::new(
            start(),
            phases,
            Some(Duration::from_millis(12)),
            Some(200),
            Outcome::Success,
        );
        assert_eq!(
            record.to_string(),
            "DNSDone: 3ms, TTFB: 10ms, TTLB: 12ms, C: false, D: false, F: false"
        );

        let record = TimingRecord::new(
            start(),
            Phases::default(),
            None,
            None,
            Outcome::DeadlineExceeded,
        );
        assert_eq!(
            record.to_string(),
            "DNSDone: 0ns, TTFB: 0ns, TTLB: 0ns, C: false, D: true, F: true"
        );
    }

    #[test]
    fn test_skipped_phases_are_zero_but_not_occurred() {
        let record = TimingRecord::new(start(), Phases::default(), None, None, Outcome::Failed);
        assert_eq!(record.dns_start, Duration::ZERO);
        assert_eq!(record.dns_done, Duration::ZERO);
        assert!(record.occurred.dns_start.is_none());
        assert!(record.occurred.first_byte.is_none());
    }
}
