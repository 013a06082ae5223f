//! Error taxonomy shared by the transport and the protocol client.
//!
//! Every failure surfaces as one [`GeckoError`] carrying an [`ErrorCode`];
//! callers branch on the code.

use std::fmt;
use thiserror::Error;

/// What went wrong on the link or in a command exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    TransportQueryError,
    NoTransportFound,
    TransportResetError,
    TransportPurgeError,
    TransportTimeoutSetError,
    CommandSendError,
    ReadDataError,
    InvalidReply,
    TooManyRetries,
    RegisterStreamSizeInvalid,
    CheatStreamSizeInvalid,
}

impl ErrorCode {
    /// Whether the link was torn down as part of this failure.
    pub fn disconnects(self) -> bool {
        matches!(
            self,
            ErrorCode::NoTransportFound
                | ErrorCode::TransportResetError
                | ErrorCode::CommandSendError
                | ErrorCode::ReadDataError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCode::TransportQueryError => "transport query failed",
            ErrorCode::NoTransportFound => "no target found",
            ErrorCode::TransportResetError => "transport reset failed",
            ErrorCode::TransportPurgeError => "transport purge failed",
            ErrorCode::TransportTimeoutSetError => "could not set transport timeouts",
            ErrorCode::CommandSendError => "command send failed",
            ErrorCode::ReadDataError => "read from target failed",
            ErrorCode::InvalidReply => "invalid reply from target",
            ErrorCode::TooManyRetries => "too many retries",
            ErrorCode::RegisterStreamSizeInvalid => "register stream has the wrong size",
            ErrorCode::CheatStreamSizeInvalid => "cheat stream is not a multiple of 8 bytes",
        };
        f.write_str(text)
    }
}

/// The single error type of the protocol layer.
#[derive(Debug, Error)]
#[error("{}{}", .code, detail_suffix(.detail))]
pub struct GeckoError {
    code: ErrorCode,
    detail: Option<String>,
    #[source]
    source: Option<std::io::Error>,
}

impl GeckoError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            detail: None,
            source: None,
        }
    }

    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
            source: None,
        }
    }

    pub fn io(code: ErrorCode, source: std::io::Error) -> Self {
        Self {
            code,
            detail: None,
            source: Some(source),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

impl From<ErrorCode> for GeckoError {
    fn from(code: ErrorCode) -> Self {
        GeckoError::new(code)
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

pub type Result<T, E = GeckoError> = std::result::Result<T, E>;
