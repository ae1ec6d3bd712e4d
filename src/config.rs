//! Server configuration
//!
//! Values come from the command line, with environment variables taking
//! precedence so editors can tune a running install without new arguments.

use std::time::Duration;

/// Default interval between document index checks.
pub const DEFAULT_INDEX_POLL_MS: u64 = 100;

/// Default number of poll ticks before a document is reported missing.
///
/// Together with [`DEFAULT_INDEX_POLL_MS`] this bounds the wait for a
/// document model to 10 seconds.
pub const DEFAULT_INDEX_MAX_ATTEMPTS: u32 = 100;

const ENV_INDEX_POLL_MS: &str = "PERL_LS_INDEX_POLL_MS";
const ENV_INDEX_MAX_ATTEMPTS: &str = "PERL_LS_INDEX_MAX_ATTEMPTS";

/// Bounded wait applied when a request needs a document model that the
/// indexer has not published yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexWaitConfig {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl IndexWaitConfig {
    pub fn new(poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            poll_interval,
            max_attempts,
        }
    }

    /// Upper bound on how long a single wait can take.
    pub fn total_bound(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

impl Default for IndexWaitConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_INDEX_POLL_MS),
            DEFAULT_INDEX_MAX_ATTEMPTS,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub index_wait: IndexWaitConfig,
}

impl ServerConfig {
    /// Build configuration from explicit values, letting environment
    /// variables override them.
    ///
    /// Checks in order:
    /// 1. `PERL_LS_INDEX_POLL_MS` / `PERL_LS_INDEX_MAX_ATTEMPTS`
    /// 2. The values passed in (usually from the command line)
    /// 3. The documented defaults
    pub fn from_env_or_default(poll_ms: Option<u64>, max_attempts: Option<u32>) -> Self {
        let poll_ms = env_parse(ENV_INDEX_POLL_MS)
            .or(poll_ms)
            .unwrap_or(DEFAULT_INDEX_POLL_MS);
        let max_attempts = env_parse(ENV_INDEX_MAX_ATTEMPTS)
            .or(max_attempts)
            .unwrap_or(DEFAULT_INDEX_MAX_ATTEMPTS);

        Self {
            index_wait: IndexWaitConfig::new(Duration::from_millis(poll_ms), max_attempts),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}='{}'", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bound_is_ten_seconds() {
        let wait = IndexWaitConfig::default();
        assert_eq!(wait.poll_interval, Duration::from_millis(100));
        assert_eq!(wait.max_attempts, 100);
        assert_eq!(wait.total_bound(), Duration::from_secs(10));
    }

    #[test]
    fn test_explicit_values_used_without_env() {
        // The env vars are not set by the test harness.
        let config = ServerConfig::from_env_or_default(Some(5), Some(3));
        assert_eq!(config.index_wait.poll_interval, Duration::from_millis(5));
        assert_eq!(config.index_wait.max_attempts, 3);
    }
}
