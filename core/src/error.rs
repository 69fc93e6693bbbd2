/// Error types for the notice feed
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Stream connection error: {0}")]
    StreamConnection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Feed already initialized")]
    AlreadyInitialized,

    #[error("Feed has been torn down")]
    TornDown,
}

impl FeedError {
    /// True for failures of a page fetch (network, non-success status, timeout).
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            FeedError::Fetch(_) | FeedError::Http { .. } | FeedError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_family() {
        assert!(FeedError::Fetch("reset".into()).is_fetch());
        assert!(FeedError::Http { status: 502, body: String::new() }.is_fetch());
        assert!(FeedError::Timeout("10s".into()).is_fetch());
        assert!(!FeedError::StreamConnection("refused".into()).is_fetch());
        assert!(!FeedError::TornDown.is_fetch());
    }

    #[test]
    fn test_display() {
        let err = FeedError::Http { status: 404, body: "not found".into() };
        assert_eq!(err.to_string(), "HTTP error 404: not found");
    }
}
