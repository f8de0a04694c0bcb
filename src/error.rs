// Error types for the Revenue API client.
//
// Every failure the library can produce is a `RevenueApiError`. HTTP
// problems are grouped under `RevenueApiError::Http` so callers can still
// tell a server outage apart from a rejected request.

use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RevenueApiError>;

#[derive(Debug, Error)]
pub enum RevenueApiError {
    /// Bad arguments or an unusable CSV file. Raised before any request.
    #[error("validation error: {0}")]
    Validation(String),

    /// The remote job never started or finished in a non-success state.
    #[error("{0}")]
    Upload(String),

    #[error("upload did not finish within {elapsed_secs}s (job {job_id})")]
    TimeExceeded { job_id: String, elapsed_secs: u64 },

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("output file already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("unexpected response from API: {0}")]
    MalformedResponse(String),

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("API is currently unavailable. Please try again later. Status: {status}. Response: {body}")]
    ServerUnavailable { status: StatusCode, body: String },

    #[error("Client error. Status: {status}. API response: {body}")]
    Client { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RevenueApiError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the same call might succeed if repeated later: server-side
    /// failures and network errors. The client itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Http(HttpError::ServerUnavailable { .. }) | Self::Http(HttpError::Transport(_))
        )
    }

    /// HTTP status of a rejected response, if that is what failed.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(HttpError::ServerUnavailable { status, .. })
            | Self::Http(HttpError::Client { status, .. }) => Some(*status),
            Self::Http(HttpError::Transport(err)) => err.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RevenueApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(HttpError::Transport(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        let server: RevenueApiError = HttpError::ServerUnavailable {
            status: StatusCode::BAD_GATEWAY,
            body: "down".into(),
        }
        .into();
        let client: RevenueApiError = HttpError::Client {
            status: StatusCode::BAD_REQUEST,
            body: "bad csv".into(),
        }
        .into();

        assert!(server.is_retryable());
        assert!(!client.is_retryable());
        assert_eq!(server.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(client.status(), Some(StatusCode::BAD_REQUEST));
        assert!(!RevenueApiError::validation("x").is_retryable());
    }

    #[test]
    fn messages_carry_status_and_body() {
        let err: RevenueApiError = HttpError::Client {
            status: StatusCode::NOT_FOUND,
            body: "no such source".into(),
        }
        .into();
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("no such source"));

        let err = RevenueApiError::TimeExceeded {
            job_id: "42".into(),
            elapsed_secs: 900,
        };
        assert!(err.to_string().contains("900s"));
    }
}
