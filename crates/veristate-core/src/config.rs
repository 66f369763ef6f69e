//! Stage runtime configuration
//!
//! Every tunable a stage binary needs in one place, with environment
//! overrides. The placement numbers default to the hosting platform's
//! response limit minus a structural-overhead headroom; deployments on a
//! different platform override them rather than patch constants.

use chrono::Duration;
use std::time::Duration as StdDuration;
use veristate_runtime::RetryPolicy;
use veristate_store::PlacementConfig;

/// Default hard platform limit on a single response, in bytes
pub const DEFAULT_RESPONSE_CEILING: u64 = 6_291_556;
/// Default headroom reserved for the response's structural fields
pub const DEFAULT_RESPONSE_HEADROOM: u64 = 500_000;
/// Default largest encoded artifact eligible for inline placement
pub const DEFAULT_PER_ARTIFACT_INLINE_MAX: u64 = 4 * 1024 * 1024;

/// Configuration for one stage invocation host
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Logical blob store holding workflow state
    pub state_store: String,
    /// Document store table holding workflow records
    pub workflow_table: String,
    /// Hard platform limit on a single response
    pub response_ceiling: u64,
    /// Bytes reserved out of the ceiling for structural overhead
    pub response_headroom: u64,
    /// Largest encoded artifact eligible for inline placement
    pub per_artifact_inline_max: u64,
    /// TTL applied to workflow records
    pub record_ttl: Duration,
    /// Backoff schedule for retried external calls
    pub retry: RetryPolicy,
    /// Fetch fan-out width
    pub max_concurrent_fetches: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            state_store: "verification-state".to_owned(),
            workflow_table: "verification-workflows".to_owned(),
            response_ceiling: DEFAULT_RESPONSE_CEILING,
            response_headroom: DEFAULT_RESPONSE_HEADROOM,
            per_artifact_inline_max: DEFAULT_PER_ARTIFACT_INLINE_MAX,
            record_ttl: Duration::days(30),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: StdDuration::from_millis(200),
                jitter_bound: StdDuration::from_millis(100),
            },
            max_concurrent_fetches: 4,
        }
    }
}

impl StageConfig {
    /// Build a config from `VERISTATE_*` environment variables
    ///
    /// Unset variables keep their defaults; unparsable values are logged and
    /// skipped rather than aborting startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("VERISTATE_STATE_STORE") {
            config.state_store = v;
        }
        if let Ok(v) = std::env::var("VERISTATE_WORKFLOW_TABLE") {
            config.workflow_table = v;
        }
        read_u64("VERISTATE_RESPONSE_CEILING", &mut config.response_ceiling);
        read_u64("VERISTATE_RESPONSE_HEADROOM", &mut config.response_headroom);
        read_u64(
            "VERISTATE_INLINE_MAX_BYTES",
            &mut config.per_artifact_inline_max,
        );
        let mut ttl_days = config.record_ttl.num_days() as u64;
        read_u64("VERISTATE_RECORD_TTL_DAYS", &mut ttl_days);
        config.record_ttl = Duration::days(ttl_days as i64);
        let mut attempts = u64::from(config.retry.max_attempts);
        read_u64("VERISTATE_RETRY_MAX_ATTEMPTS", &mut attempts);
        config.retry.max_attempts = attempts.min(u64::from(u32::MAX)) as u32;
        let mut fan_out = config.max_concurrent_fetches as u64;
        read_u64("VERISTATE_MAX_CONCURRENT_FETCHES", &mut fan_out);
        config.max_concurrent_fetches = fan_out.max(1) as usize;
        config
    }

    /// Response bytes actually available to inline payloads
    #[inline]
    #[must_use]
    pub fn usable_ceiling(&self) -> u64 {
        self.response_ceiling.saturating_sub(self.response_headroom)
    }

    /// Placement thresholds derived from this config
    #[inline]
    #[must_use]
    pub fn placement(&self) -> PlacementConfig {
        PlacementConfig {
            absolute_ceiling: self.usable_ceiling(),
            per_artifact_inline_max: self.per_artifact_inline_max,
        }
    }

    /// Override the state store name
    #[must_use]
    pub fn with_state_store(mut self, name: impl Into<String>) -> Self {
        self.state_store = name.into();
        self
    }

    /// Override the workflow table name
    #[must_use]
    pub fn with_workflow_table(mut self, name: impl Into<String>) -> Self {
        self.workflow_table = name.into();
        self
    }

    /// Override the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn read_u64(var: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(var, raw = %raw, "ignoring unparsable numeric override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_platform_numbers() {
        let config = StageConfig::default();
        assert_eq!(config.response_ceiling, 6_291_556);
        assert_eq!(config.response_headroom, 500_000);
        assert_eq!(config.usable_ceiling(), 5_791_556);
        assert_eq!(config.per_artifact_inline_max, 4 * 1024 * 1024);
        assert_eq!(config.max_concurrent_fetches, 4);
    }

    #[test]
    fn placement_derives_from_ceiling_and_headroom() {
        let config = StageConfig {
            response_ceiling: 1000,
            response_headroom: 100,
            per_artifact_inline_max: 500,
            ..StageConfig::default()
        };
        let placement = config.placement();
        assert_eq!(placement.absolute_ceiling, 900);
        assert_eq!(placement.per_artifact_inline_max, 500);
    }

    #[test]
    fn headroom_larger_than_ceiling_saturates() {
        let config = StageConfig {
            response_ceiling: 100,
            response_headroom: 500,
            ..StageConfig::default()
        };
        assert_eq!(config.usable_ceiling(), 0);
    }
}
