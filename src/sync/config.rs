/// Runtime configuration for the sync engine.
use serde::{Deserialize, Serialize};

use crate::sync::limits::{LogLimits, DEFAULT_CACHE_CAPACITY};

/// How the evaluator treats an operation whose target id does not exist.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Skip the operation and keep evaluating. Tolerates offline and
    /// out-of-order delivery.
    #[default]
    Lenient,
    /// Fail the evaluation with `EvalError::DanglingReference`.
    Strict,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    pub reference_policy: ReferencePolicy,
    /// Minimum number of materialized groups held by the evaluation cache.
    /// The store grows the cache to its group count, so a full `all()` scan
    /// never evicts its own entries.
    pub cache_capacity: usize,
    pub log_limits: LogLimits,
    /// Origin used to build share links, e.g. `https://app.example`.
    pub share_origin: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            reference_policy: ReferencePolicy::Lenient,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            log_limits: LogLimits::default(),
            share_origin: String::new(),
        }
    }
}

impl SyncConfig {
    pub fn strict() -> Self {
        SyncConfig {
            reference_policy: ReferencePolicy::Strict,
            ..Self::default()
        }
    }

    pub fn with_log_limits(mut self, max_pending: usize, hard_cap: usize) -> Self {
        self.log_limits = LogLimits {
            max_pending,
            hard_cap,
        };
        self
    }

    pub fn with_share_origin(mut self, origin: impl Into<String>) -> Self {
        self.share_origin = origin.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_lenient() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.reference_policy, ReferencePolicy::Lenient);
        assert_eq!(cfg.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg: SyncConfig = serde_json::from_str(r#"{"reference_policy":"strict"}"#).unwrap();
        assert_eq!(cfg.reference_policy, ReferencePolicy::Strict);
        assert_eq!(cfg.cache_capacity, DEFAULT_CACHE_CAPACITY);
        assert!(cfg.share_origin.is_empty());
        assert_eq!(cfg.log_limits, LogLimits::default());
    }

    #[test]
    fn test_log_limits_from_json() {
        let cfg: SyncConfig =
            serde_json::from_str(r#"{"log_limits":{"hard_cap":10}}"#).unwrap();
        assert_eq!(cfg.log_limits.hard_cap, 10);
        assert_eq!(
            cfg.log_limits.max_pending,
            crate::sync::limits::MAX_PENDING_OPS
        );
    }
}
