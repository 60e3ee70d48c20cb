//! Error taxonomy for the request lifecycle.

use crate::request::Request;
use std::fmt;

/// Error when fetching a request.
///
/// The variants split the retry policy: [`FetchError::Retryable`] and
/// [`FetchError::Timeout`] are re-attempted by the retry envelope, the
/// rest fail the request on first occurrence.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP 429, 403, 5xx or a transient transport problem.
    #[error("retryable request error: {message}")]
    Retryable {
        message: String,
        status: Option<u16>,
    },
    /// Any other client error (4xx) or a request rejected before sending.
    #[error("request error: {message}")]
    NonRetryable {
        message: String,
        status: Option<u16>,
    },
    /// Connect or read timeout. Retried like [`FetchError::Retryable`],
    /// kept distinct for failure records.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Everything else. Not retried.
    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}

impl FetchError {
    /// Whether the retry envelope should re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. } | Self::Timeout(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Retryable { .. } => ErrorKind::Retryable,
            Self::NonRetryable { .. } => ErrorKind::NonRetryable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Generic(_) => ErrorKind::Generic,
        }
    }

    /// HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Retryable { status, .. } | Self::NonRetryable { status, .. } => *status,
            _ => None,
        }
    }
}

/// Classification of a terminal request failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    Retryable,
    NonRetryable,
    Timeout,
    /// The user callback panicked while parsing a response.
    Parsing,
    Generic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retryable => "Retryable",
            Self::NonRetryable => "NonRetryable",
            Self::Timeout => "Timeout",
            Self::Parsing => "Parsing",
            Self::Generic => "Generic",
        };
        f.write_str(name)
    }
}

/// Terminal record for a request that will not be fetched again in this run.
#[derive(Clone, Debug)]
pub struct FailedRequest {
    pub request: Request,
    pub message: String,
    pub kind: ErrorKind,
}

impl FailedRequest {
    pub fn new(request: Request, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            request,
            message: message.into(),
            kind,
        }
    }
}

/// Error when building a [`Request`](crate::request::Request).
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request has no URL")]
    MissingUrl,
    #[error("request has no callback")]
    MissingCallback,
    #[error("request has no fetcher")]
    MissingFetcher,
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported URL scheme: {0}")]
    Scheme(String),
    #[error("POST requires non-empty form_data or json_data")]
    PostWithoutBody,
    #[error("GET must not carry form_data or json_data")]
    GetWithBody,
    #[error("timeout must be between 1 and 300 seconds, got {0}s")]
    TimeoutRange(u64),
}

/// Error when deriving a view from a [`Response`](crate::response::Response).
#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("cannot build an HTML tree from a JSON response")]
    JsonBody,
}
