//! Error taxonomy for provider access and for the pure analytics stages.

use thiserror::Error;

use crate::model::SourceOutcome;

/// Everything that can go wrong while talking to one provider.
/// Never escapes an adapter: `SourceAdapter::fetch` converts it into a
/// [`SourceOutcome`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("http status {0}")]
    Http(u16),

    #[error("unexpected response body: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("missing configuration: {0}")]
    Config(String),
}

impl SourceError {
    pub fn parse(msg: impl std::fmt::Display) -> Self {
        SourceError::Parse(msg.to_string())
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Parse(e.to_string())
    }
}

impl From<SourceError> for SourceOutcome {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Timeout(_) => SourceOutcome::Timeout,
            SourceError::Network(m) => SourceOutcome::NetworkError(m),
            SourceError::Http(status) => SourceOutcome::HttpError(status),
            SourceError::Parse(m) => SourceOutcome::ParseError(m),
            SourceError::Auth(m) => SourceOutcome::AuthError(m),
            SourceError::Config(m) => SourceOutcome::ConfigError(m),
        }
    }
}

/// Failures of the analytics/assembly stages. These operate on validated
/// data, so any of them is a defect and fails the whole request.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("metric `{id}` has non-finite value")]
    NonFiniteMetric { id: String },

    #[error("cluster `{key}` has non-finite centroid")]
    NonFiniteCentroid { key: String },
}
