use thiserror::Error;

pub type SegmentResult<T> = Result<T, SegmentError>;

#[derive(Error, Debug)]
pub enum SegmentError {
    /// Malformed rule tree, condition, group or segment payload.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Segment or record set not found, or owned by another account.
    #[error("Lookup failed: {0}")]
    Lookup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SegmentError {
    /// Message suitable for the response envelopes handed back to the UI.
    /// Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Validation(msg) | Self::Lookup(msg) => msg.clone(),
            Self::Config(_) => "Segmentation is misconfigured".to_string(),
            Self::Serialization(_) => "Rules could not be decoded".to_string(),
            Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<config::ConfigError> for SegmentError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
