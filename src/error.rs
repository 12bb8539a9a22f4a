use thiserror::Error;

/// Failures raised while talking to a backend or decoding its payloads.
///
/// These never cross the public API: source clients log them and degrade to
/// an empty result, so callers cannot tell "no lyrics exist" from "request
/// failed". Recovery is trying the next configured source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network: {0}")]
    Network(#[from] reqwest::Error),

    /// The remote answered with a non-zero status code of its own protocol.
    #[error("remote status {0}")]
    Protocol(i64),

    #[error("decode: {0}")]
    Decode(String),
}

impl From<crate::crypto::CipherError> for SourceError {
    fn from(err: crate::crypto::CipherError) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl From<base64::DecodeError> for SourceError {
    fn from(err: base64::DecodeError) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl From<hex::FromHexError> for SourceError {
    fn from(err: hex::FromHexError) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for SourceError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}
