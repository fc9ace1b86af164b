#![forbid(unsafe_code)]

//! Error type shared by the library modules.

use thiserror::Error;

/// Every failure a request can end with.
///
/// The HTTP layer maps `Validation` to 400 and everything else to 500.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Validation(String),

    #[error("failed to extract video info: {0}")]
    Extraction(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("unexpected extractor output: {0}")]
    MalformedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// The underlying message without the variant prefix, suitable for the
    /// `details` field of an API error.
    pub fn detail(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::Extraction(msg)
            | Self::Download(msg)
            | Self::MalformedResponse(msg) => msg.clone(),
            Self::Io(err) => err.to_string(),
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_strips_variant_prefix() {
        let err = FetchError::Extraction("Video unavailable".into());
        assert_eq!(err.to_string(), "failed to extract video info: Video unavailable");
        assert_eq!(err.detail(), "Video unavailable");
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FetchError = io.into();
        assert!(matches!(err, FetchError::Io(_)));
        assert_eq!(err.detail(), "gone");
    }
}
