use std::time::Duration;

use callpath_protocol::SharedStr;
use serde::{Deserialize, Serialize};

/// Aggregated timing for one identity at one call path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerProfile {
    pub identity: SharedStr,
    /// Completed, non-cancelled invocations.
    pub call_count: u64,
    /// Inclusive wall time summed over those invocations.
    pub total_time: Duration,
}

impl CallerProfile {
    pub fn new(identity: SharedStr) -> Self {
        Self {
            identity,
            call_count: 0,
            total_time: Duration::ZERO,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.call_count += 1;
        self.total_time += elapsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates() {
        let mut p = CallerProfile::new("f".into());
        p.record(Duration::from_millis(19));
        p.record(Duration::from_millis(21));
        assert_eq!(p.call_count, 2);
        assert_eq!(p.total_time, Duration::from_millis(40));
    }

    #[test]
    fn new_profile_is_empty() {
        let p = CallerProfile::new("f".into());
        assert_eq!((p.call_count, p.total_time), (0, Duration::ZERO));
    }
}
