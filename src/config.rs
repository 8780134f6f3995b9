//! Garbage-collection configuration.

use crate::errors::{KvGitError, KvGitResult};

/// Default fallback fraction for `low_water_bytes` when the caller omits it
/// or supplies one outside `(0, high_water]`.
const DEFAULT_LOW_WATER_FRACTION: f64 = 0.8;

/// Default minimum age, in seconds, an unreachable commit must clear before
/// orphan sweep reclaims it.
pub const DEFAULT_MIN_AGE_SECS: i64 = 3600;

/// Water-mark policy for [`crate::gc::GcView`].
///
/// `is_protected` classifies a user key as protected (default: the key's
/// last `/`-separated segment starts with `__`). Protected keys are always
/// retained by rebase and excluded from size accounting.
#[derive(Clone)]
pub struct GcConfig {
    pub high_water_bytes: u64,
    pub low_water_bytes: u64,
    pub min_age_secs: i64,
    is_protected: fn(&str) -> bool,
}

pub(crate) fn default_is_protected(key: &str) -> bool {
    key.rsplit('/').next().unwrap_or(key).starts_with("__")
}

impl GcConfig {
    /// Build a config, validating `high_water_bytes > 0` and falling back to
    /// 80% of high for an absent or out-of-range `low_water_bytes`.
    pub fn new(high_water_bytes: u64, low_water_bytes: Option<u64>) -> KvGitResult<Self> {
        if high_water_bytes == 0 {
            return Err(KvGitError::InvalidArgument(
                "high_water_bytes must be > 0".to_string(),
            ));
        }
        let default_low = (high_water_bytes as f64 * DEFAULT_LOW_WATER_FRACTION) as u64;
        let low_water_bytes = match low_water_bytes {
            Some(low) if low > 0 && low <= high_water_bytes => low,
            _ => default_low,
        };
        Ok(Self {
            high_water_bytes,
            low_water_bytes,
            min_age_secs: DEFAULT_MIN_AGE_SECS,
            is_protected: default_is_protected,
        })
    }

    /// Override the protected-key predicate (default: last path segment
    /// starts with `__`).
    pub fn with_protected_predicate(mut self, pred: fn(&str) -> bool) -> Self {
        self.is_protected = pred;
        self
    }

    /// Override the orphan-sweep age gate, in seconds.
    pub fn with_min_age_secs(mut self, min_age_secs: i64) -> Self {
        self.min_age_secs = min_age_secs;
        self
    }

    pub fn is_protected(&self, key: &str) -> bool {
        (self.is_protected)(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_high_water() {
        let err = GcConfig::new(0, None).unwrap_err();
        assert!(matches!(err, KvGitError::InvalidArgument(_)));
    }

    #[test]
    fn low_water_defaults_to_80_percent() {
        let cfg = GcConfig::new(1000, None).unwrap();
        assert_eq!(cfg.low_water_bytes, 800);
    }

    #[test]
    fn invalid_low_water_falls_back() {
        let cfg = GcConfig::new(1000, Some(2000)).unwrap();
        assert_eq!(cfg.low_water_bytes, 800);
    }

    #[test]
    fn default_protected_predicate() {
        let cfg = GcConfig::new(100, None).unwrap();
        assert!(cfg.is_protected("__system__"));
        assert!(cfg.is_protected("ns/__system__"));
        assert!(!cfg.is_protected("user_var"));
    }
}
