/// Pending-log guardrails.
///
/// A client that stays offline keeps appending to its pending log; these
/// constants bound how large a single operation and a single log may grow
/// before the store starts warning or refusing new edits. The pending-log
/// bounds can be overridden per store through `SyncConfig::log_limits`.
use serde::{Deserialize, Serialize};

/// Max CBOR-encoded payload size per operation.
pub const MAX_OP_PAYLOAD_BYTES: usize = 64 * 1024; // 64 KB

/// Pending ops per group before a "needs sync" warning.
pub const MAX_PENDING_OPS: usize = 5_000;

/// Pending ops per group hard cap. New local edits are refused beyond this.
pub const HARD_CAP_PENDING_OPS: usize = 50_000;

/// Default number of materialized groups kept by the evaluation cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Pending-log status for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLimitStatus {
    /// Under soft cap, all edits accepted.
    Ok,
    /// Log is growing large; caller should push to the server soon.
    NeedsSync,
    /// Hard cap reached. New non-member edits rejected until a reconciliation
    /// trims the log.
    HardCapReached,
}

/// Pending-log bounds for one store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LogLimits {
    /// Warn above this many pending ops.
    pub max_pending: usize,
    /// Refuse non-member edits at this many pending ops.
    pub hard_cap: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        LogLimits {
            max_pending: MAX_PENDING_OPS,
            hard_cap: HARD_CAP_PENDING_OPS,
        }
    }
}

/// Classify a pending-log length.
pub fn check_log_limits(pending: usize, limits: &LogLimits) -> LogLimitStatus {
    if pending >= limits.hard_cap {
        LogLimitStatus::HardCapReached
    } else if pending >= limits.max_pending {
        LogLimitStatus::NeedsSync
    } else {
        LogLimitStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_limits_ok() {
        let limits = LogLimits::default();
        assert_eq!(check_log_limits(0, &limits), LogLimitStatus::Ok);
        assert_eq!(check_log_limits(MAX_PENDING_OPS - 1, &limits), LogLimitStatus::Ok);
    }

    #[test]
    fn test_log_limits_needs_sync() {
        let limits = LogLimits::default();
        assert_eq!(check_log_limits(MAX_PENDING_OPS, &limits), LogLimitStatus::NeedsSync);
        assert_eq!(
            check_log_limits(HARD_CAP_PENDING_OPS - 1, &limits),
            LogLimitStatus::NeedsSync
        );
    }

    #[test]
    fn test_log_limits_hard_cap() {
        let limits = LogLimits::default();
        assert_eq!(
            check_log_limits(HARD_CAP_PENDING_OPS, &limits),
            LogLimitStatus::HardCapReached
        );
        assert_eq!(check_log_limits(usize::MAX, &limits), LogLimitStatus::HardCapReached);
    }

    #[test]
    fn test_custom_limits() {
        let limits = LogLimits {
            max_pending: 2,
            hard_cap: 3,
        };
        assert_eq!(check_log_limits(1, &limits), LogLimitStatus::Ok);
        assert_eq!(check_log_limits(2, &limits), LogLimitStatus::NeedsSync);
        assert_eq!(check_log_limits(3, &limits), LogLimitStatus::HardCapReached);
    }
}
