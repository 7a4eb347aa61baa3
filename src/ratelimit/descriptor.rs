//! Storage key generation and handling.

use std::fmt;

/// Separator between the key prefix and the caller's key.
const PREFIX_SEPARATOR: char = ':';

/// The key a counter row is stored under.
///
/// Composed of the limiter's key prefix and the caller's key, so several
/// limiters can share one table without their counters colliding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Build the storage key for `key` under `prefix`.
    ///
    /// An empty prefix stores the key as-is.
    pub fn new(prefix: &str, key: &str) -> Self {
        if prefix.is_empty() {
            Self(key.to_string())
        } else {
            Self(format!("{}{}{}", prefix, PREFIX_SEPARATOR, key))
        }
    }

    /// The full storage key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the caller's key by stripping `prefix`.
    ///
    /// Returns the full key when it was not stored under `prefix`.
    pub fn caller_key<'a>(&'a self, prefix: &str) -> &'a str {
        if prefix.is_empty() {
            return &self.0;
        }

        self.0
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix(PREFIX_SEPARATOR))
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
