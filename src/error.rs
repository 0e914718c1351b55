// Typed errors with thiserror. Surface meaningful messages to JS.

use thiserror::Error;

/// Tracker error types.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("DOM access failed: {0}")]
    Dom(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        TrackerError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TrackerError::InvalidConfig("bad viewable_on".to_string());
        assert!(err.to_string().contains("bad viewable_on"));
    }
}
