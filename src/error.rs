use thiserror::Error;

/// Upstream fetch failures. Retryable on the next cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl SourceError {
    pub fn transport(url: &str, source: reqwest::Error) -> Self {
        SourceError::Transport {
            url: url.to_string(),
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("ATCODER_USER_ID is not set")]
    MissingUserId,

    #[error("no valid https:// webhook URL in {0}")]
    NoWebhooks(&'static str),

    #[error("UTC offset {0}h is out of range (-23..=23)")]
    InvalidOffset(i32),

    #[error("interval {0}s is too short, minimum is {1}s")]
    IntervalTooShort(u64, u64),

    #[error("timeout must be at least one second")]
    InvalidTimeout,

    #[error("invalid database URL '{0}': must start with libsql:// or https://")]
    InvalidDatabaseUrl(String),

    #[error("DATABASE_URL requires DATABASE_AUTH_TOKEN to be set")]
    MissingDatabaseToken,

    #[error("contest prefix must not be empty")]
    EmptyPrefix,
}

#[derive(Debug, Error, PartialEq)]
#[error("all {attempted} webhook deliveries failed")]
pub struct DeliveryError {
    pub attempted: usize,
}
