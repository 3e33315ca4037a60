//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into
//! services. This avoids reading process-wide state during request handling,
//! which can lead to inconsistent behaviour in multi-threaded runtimes and
//! test harnesses.

use ward_types::NonEmptyText;

use crate::error::{RecordError, RecordResult};

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    default_episode_category: NonEmptyText,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::InvalidInput`] if `default_episode_category`
    /// is empty or whitespace.
    pub fn new(default_episode_category: impl AsRef<str>) -> RecordResult<Self> {
        let default_episode_category =
            NonEmptyText::new(default_episode_category).map_err(|_| {
                RecordError::InvalidInput("default_episode_category cannot be empty".into())
            })?;
        Ok(Self {
            default_episode_category,
        })
    }

    /// The category assigned to episodes created without an explicit one.
    pub fn default_episode_category(&self) -> &str {
        self.default_episode_category.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_empty_category() {
        let err = CoreConfig::new("  ").expect_err("empty category should be rejected");
        assert!(matches!(err, RecordError::InvalidInput(_)));
    }

    #[test]
    fn test_default_episode_category_round_trips() {
        let cfg = CoreConfig::new("inpatient").expect("CoreConfig::new should succeed");
        assert_eq!(cfg.default_episode_category(), "inpatient");
    }

    #[test]
    fn test_category_is_trimmed_on_construction() {
        let cfg = CoreConfig::new("  inpatient ").expect("padded category should be accepted");
        assert_eq!(cfg.default_episode_category(), "inpatient");
    }
}
