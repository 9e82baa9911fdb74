//! Tunables of a pipeline run (the `[pipeline]` table of `scriptorium.toml`).
//!
//! ```toml
//! [pipeline]
//! rate_limit = 10
//! call_timeout_secs = 600
//! research_max_calls = 2
//! min_research_chars = 40
//! min_section_words = 200
//! section_attempts = 2
//! retry_backoff_cap_secs = 60
//! cover_attempts = 5
//! min_artifact_bytes = 1000
//! language = "es"
//! stop_list = ["referencias", "references", "bibliografía", "bibliography"]
//! ```

use std::num::NonZeroU32;
use std::time::Duration;

use pipeline::{ConfigurationError, PlanPolicy};
use serde::{Deserialize, Serialize};

/// Upper bound accepted for `rate_limit` (calls per minute).
pub const MAX_RATE_LIMIT: u32 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Maximum external calls per trailing minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    /// Timeout of every collaborator call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Research calls allowed per section attempt.
    #[serde(default = "default_research_max_calls")]
    pub research_max_calls: u32,
    #[serde(default = "default_min_research_chars")]
    pub min_research_chars: usize,
    /// Body words a section needs before it is appended.
    #[serde(default = "default_min_section_words")]
    pub min_section_words: usize,
    /// Attempts per section, first one included.
    #[serde(default = "default_section_attempts")]
    pub section_attempts: u32,
    #[serde(default = "default_retry_backoff_cap_secs")]
    pub retry_backoff_cap_secs: u64,
    /// Image candidates tried before giving up on a cover.
    #[serde(default = "default_cover_attempts")]
    pub cover_attempts: usize,
    /// Smallest artifact accepted as a real document.
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: u64,
    /// Language the document is written in (ISO 639-1).
    #[serde(default = "default_language")]
    pub language: String,
    /// Headings excluded from the section plan (lowercase prefixes).
    #[serde(default = "default_stop_list")]
    pub stop_list: Vec<String>,
}

fn default_rate_limit() -> u32 {
    10
}

fn default_call_timeout_secs() -> u64 {
    600
}

fn default_research_max_calls() -> u32 {
    2
}

fn default_min_research_chars() -> usize {
    40
}

fn default_min_section_words() -> usize {
    200
}

fn default_section_attempts() -> u32 {
    2
}

fn default_retry_backoff_cap_secs() -> u64 {
    60
}

fn default_cover_attempts() -> usize {
    5
}

fn default_min_artifact_bytes() -> u64 {
    1000
}

fn default_language() -> String {
    "es".to_string()
}

fn default_stop_list() -> Vec<String> {
    PlanPolicy::default().stop_list
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            call_timeout_secs: default_call_timeout_secs(),
            research_max_calls: default_research_max_calls(),
            min_research_chars: default_min_research_chars(),
            min_section_words: default_min_section_words(),
            section_attempts: default_section_attempts(),
            retry_backoff_cap_secs: default_retry_backoff_cap_secs(),
            cover_attempts: default_cover_attempts(),
            min_artifact_bytes: default_min_artifact_bytes(),
            language: default_language(),
            stop_list: default_stop_list(),
        }
    }
}

impl PipelineSettings {
    /// Rejects values a run cannot work with.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(1..=MAX_RATE_LIMIT).contains(&self.rate_limit) {
            return Err(ConfigurationError::new(format!(
                "rate_limit must be between 1 and {MAX_RATE_LIMIT}, got {}",
                self.rate_limit
            )));
        }
        let positive = [
            ("call_timeout_secs", self.call_timeout_secs),
            ("research_max_calls", u64::from(self.research_max_calls)),
            ("min_section_words", self.min_section_words as u64),
            ("section_attempts", u64::from(self.section_attempts)),
            ("cover_attempts", self.cover_attempts as u64),
            ("min_artifact_bytes", self.min_artifact_bytes),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigurationError::new(format!("{name} must be greater than zero")));
        }
        if self.language.trim().is_empty() {
            return Err(ConfigurationError::new("language must not be empty"));
        }
        Ok(())
    }

    /// The rate limit as a non-zero budget. Falls back to one call per minute
    /// for an unvalidated zero.
    pub fn rate_budget(&self) -> NonZeroU32 {
        NonZeroU32::new(self.rate_limit).unwrap_or(NonZeroU32::MIN)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn retry_backoff_cap(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_cap_secs)
    }

    pub fn plan_policy(&self) -> PlanPolicy {
        PlanPolicy {
            stop_list: self.stop_list.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = PipelineSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.rate_budget().get(), 10);
        assert_eq!(settings.call_timeout(), Duration::from_secs(600));
        assert_eq!(settings.plan_policy(), PlanPolicy::default());
    }

    #[test]
    fn rate_limit_outside_range_is_rejected() {
        let zero = PipelineSettings {
            rate_limit: 0,
            ..PipelineSettings::default()
        };
        assert!(zero.validate().unwrap_err().message.contains("rate_limit"));
        let huge = PipelineSettings {
            rate_limit: 601,
            ..PipelineSettings::default()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn zero_floor_is_rejected_by_name() {
        let settings = PipelineSettings {
            min_artifact_bytes: 0,
            ..PipelineSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.message.contains("min_artifact_bytes"));
    }

    #[test]
    fn partial_table_keeps_defaults() {
        let settings: PipelineSettings = serde_json::from_str(r#"{"rate_limit": 30}"#).unwrap();
        assert_eq!(settings.rate_limit, 30);
        assert_eq!(settings.min_section_words, 200);
        assert_eq!(settings.language, "es");
    }
}
