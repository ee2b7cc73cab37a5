//! Bounded-retry bookkeeping
//!
//! Counts consecutive failures of the same track reference. A failure of a
//! different reference restarts the count at 1, and a clean end of stream
//! clears it.

use vsp_common::events::FailureDisposition;

/// Outcome of recording one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureRecord {
    /// Consecutive failures of this reference, including this one
    pub consecutive_failures: u32,

    /// True when this failure started a new count (different reference)
    pub new_reference: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryTracker {
    last_failed_reference: Option<String>,
    consecutive_failures: u32,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, reference: &str) -> FailureRecord {
        if self.last_failed_reference.as_deref() == Some(reference) {
            self.consecutive_failures += 1;
            FailureRecord {
                consecutive_failures: self.consecutive_failures,
                new_reference: false,
            }
        } else {
            self.last_failed_reference = Some(reference.to_string());
            self.consecutive_failures = 1;
            FailureRecord {
                consecutive_failures: 1,
                new_reference: true,
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_failed_reference = None;
        self.consecutive_failures = 0;
    }

    pub fn last_failed_reference(&self) -> Option<&str> {
        self.last_failed_reference.as_deref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// What a failure of `reference` will lead to, announced before it is
    /// recorded.
    pub fn upcoming_disposition(&self, reference: &str, retry_limit: u32) -> FailureDisposition {
        let upcoming = if self.last_failed_reference.as_deref() == Some(reference) {
            self.consecutive_failures + 1
        } else {
            1
        };
        if upcoming >= retry_limit {
            FailureDisposition::Skip
        } else {
            FailureDisposition::Retry
        }
    }
}
