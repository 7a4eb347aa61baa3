//! Limiter options and their validation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollboothError};

/// Longest identifier Postgres accepts without truncation.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Configuration for a persistent rate limiter.
///
/// Fixed for the lifetime of the limiter it builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterOptions {
    /// Maximum points per window
    #[serde(default = "default_points")]
    pub points: u32,

    /// Window length in seconds; 0 means windows never expire
    #[serde(default = "default_duration")]
    pub duration: u64,

    /// Seconds to deny a key once it exceeds its budget; 0 disables blocking
    #[serde(default)]
    pub block_duration: u64,

    /// Prefix applied to every key; empty disables prefixing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Table holding the counter rows
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Schema qualifying the table (Postgres only)
    #[serde(default)]
    pub schema_name: Option<String>,

    /// Skip table creation because the table is provisioned elsewhere
    #[serde(default)]
    pub table_created: bool,

    /// How often to purge long-expired rows, in seconds; 0 disables the purge
    #[serde(default = "default_clear_expired_interval")]
    pub clear_expired_interval_secs: u64,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            points: default_points(),
            duration: default_duration(),
            block_duration: 0,
            key_prefix: default_key_prefix(),
            table_name: default_table_name(),
            schema_name: None,
            table_created: false,
            clear_expired_interval_secs: default_clear_expired_interval(),
        }
    }
}

fn default_points() -> u32 {
    4
}

fn default_duration() -> u64 {
    1
}

fn default_key_prefix() -> String {
    "rlflx".to_string()
}

fn default_table_name() -> String {
    "rate_limits".to_string()
}

fn default_clear_expired_interval() -> u64 {
    300
}

impl LimiterOptions {
    /// Create options with the given budget and window length.
    pub fn new(points: u32, duration: u64) -> Self {
        Self {
            points,
            duration,
            ..Self::default()
        }
    }

    /// Set the block duration in seconds.
    pub fn with_block_duration(mut self, secs: u64) -> Self {
        self.block_duration = secs;
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the table name.
    pub fn with_table_name(mut self, table: impl Into<String>) -> Self {
        self.table_name = table.into();
        self
    }

    /// Mark the table as already provisioned.
    pub fn with_table_created(mut self, created: bool) -> Self {
        self.table_created = created;
        self
    }

    /// Set the purge interval in seconds.
    pub fn with_clear_expired_interval(mut self, secs: u64) -> Self {
        self.clear_expired_interval_secs = secs;
        self
    }

    /// Check that the options describe a usable limiter.
    ///
    /// Table and schema names are interpolated into SQL, so they must be
    /// plain identifiers.
    pub fn validate(&self) -> Result<()> {
        validate_identifier("table_name", &self.table_name)?;
        if let Some(schema) = &self.schema_name {
            validate_identifier("schema_name", schema)?;
        }

        secs_to_ms("duration", self.duration)?;
        secs_to_ms("block_duration", self.block_duration)?;

        Ok(())
    }

    /// Window length in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        saturating_secs_to_ms(self.duration)
    }

    /// Block length in milliseconds.
    pub fn block_duration_ms(&self) -> i64 {
        saturating_secs_to_ms(self.block_duration)
    }

    /// The expiry a window opened at `now` receives.
    pub fn window_expire(&self, now: i64) -> Option<i64> {
        (self.duration > 0).then(|| now.saturating_add(self.duration_ms()))
    }

    /// The expiry a block applied at `now` receives, if blocking is enabled.
    pub fn block_expire(&self, now: i64) -> Option<i64> {
        (self.block_duration > 0).then(|| now.saturating_add(self.block_duration_ms()))
    }
}

/// Convert seconds to milliseconds, rejecting values that overflow.
pub(crate) fn secs_to_ms(field: &str, secs: u64) -> Result<i64> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| s.checked_mul(1000))
        .ok_or_else(|| TollboothError::Config(format!("{} of {}s is too large", field, secs)))
}

fn saturating_secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

fn validate_identifier(field: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let starts_well = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !starts_well || !rest_ok || name.len() > MAX_IDENTIFIER_LEN {
        return Err(TollboothError::Config(format!(
            "{} must be a plain SQL identifier of at most {} characters, got {:?}",
            field, MAX_IDENTIFIER_LEN, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = LimiterOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.points, 4);
        assert_eq!(options.duration, 1);
        assert_eq!(options.key_prefix, "rlflx");
        assert_eq!(options.table_name, "rate_limits");
    }

    #[test]
    fn test_rejects_bad_table_names() {
        for name in ["", "1abc", "rate-limits", "limits; DROP TABLE x", "a\"b"] {
            let options = LimiterOptions::default().with_table_name(name);
            assert!(options.validate().is_err(), "{:?} should be rejected", name);
        }

        let long = "t".repeat(64);
        assert!(LimiterOptions::default().with_table_name(long).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_schema_name() {
        let mut options = LimiterOptions::default();
        options.schema_name = Some("public.x".to_string());
        assert!(options.validate().is_err());

        options.schema_name = Some("limits_v2".to_string());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_rejects_overflowing_durations() {
        assert!(LimiterOptions::new(1, u64::MAX).validate().is_err());
        assert!(LimiterOptions::new(1, 1)
            .with_block_duration(u64::MAX / 10)
            .validate()
            .is_err());
    }

    #[test]
    fn test_window_expire() {
        assert_eq!(LimiterOptions::new(1, 5).window_expire(1_000), Some(6_000));
        assert_eq!(LimiterOptions::new(1, 0).window_expire(1_000), None);
    }

    #[test]
    fn test_block_expire() {
        let options = LimiterOptions::new(1, 1);
        assert_eq!(options.block_expire(1_000), None);

        let options = options.with_block_duration(2);
        assert_eq!(options.block_expire(1_000), Some(3_000));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let yaml = r#"
points: 10
block_duration: 60
key_prefix: login
"#;
        let options: LimiterOptions = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(options.points, 10);
        assert_eq!(options.duration, 1);
        assert_eq!(options.block_duration, 60);
        assert_eq!(options.key_prefix, "login");
        assert_eq!(options.clear_expired_interval_secs, 300);
        assert!(!options.table_created);
    }
}
