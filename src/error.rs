//! Stable error taxonomy for the generation pipeline.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Every failure the gateway can surface, one variant per pipeline phase.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    /// The session provider refused or timed out.
    #[error("session provisioning failed: {0}")]
    Provisioning(String),

    #[error("get_upload_token failed: {0}")]
    UploadToken(String),

    #[error("ApplyImageUpload failed: {0}")]
    UploadApply(String),

    #[error("upload PUT failed: {0}")]
    UploadPut(String),

    #[error("CommitImageUpload failed: {0}")]
    UploadCommit(String),

    #[error("draft submit failed: {0}")]
    DraftSubmit(String),

    #[error("generation did not finish within {ticks} polls")]
    PollTimeout { ticks: u32 },

    #[error("generation stalled: no progress for {ticks} polls")]
    PollStall { ticks: u32 },

    #[error("{message} (status {status}, fail_code {fail_code:?})")]
    PollRemoteFailed {
        status: i64,
        fail_code: Option<String>,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream error: {0}")]
    Server(String),

    /// The comma-separated token pool in the Authorization header was empty.
    #[error("session token pool exhausted")]
    TokenPoolExhausted,
}

impl GatewayError {
    /// Stable kind string carried in error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) | Self::TokenPoolExhausted => "auth",
            Self::Provisioning(_) => "provisioning",
            Self::UploadToken(_) => "upload-token",
            Self::UploadApply(_) => "upload-apply",
            Self::UploadPut(_) => "upload-put",
            Self::UploadCommit(_) => "upload-commit",
            Self::DraftSubmit(_) => "draft-submit",
            Self::PollTimeout { .. } => "poll-timeout",
            Self::PollStall { .. } => "poll-stall",
            Self::PollRemoteFailed { .. } => "poll-remote-failed",
            Self::Transport(_) => "transport",
            Self::Server(_) => "server",
        }
    }

    /// True for faults the poller may retry (a bounded number of times).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::TokenPoolExhausted => StatusCode::UNAUTHORIZED,
            Self::Provisioning(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::PollTimeout { .. } | Self::PollStall { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().is_some_and(|s| s == 401 || s == 403) {
            Self::Auth(e.to_string())
        } else if e.status().is_some_and(|s| s.is_server_error()) {
            Self::Server(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let cases: Vec<(GatewayError, &str)> = vec![
            (GatewayError::Validation("x".into()), "validation"),
            (GatewayError::Auth("x".into()), "auth"),
            (GatewayError::TokenPoolExhausted, "auth"),
            (GatewayError::UploadToken("x".into()), "upload-token"),
            (GatewayError::UploadApply("x".into()), "upload-apply"),
            (GatewayError::UploadPut("x".into()), "upload-put"),
            (GatewayError::UploadCommit("x".into()), "upload-commit"),
            (GatewayError::DraftSubmit("x".into()), "draft-submit"),
            (GatewayError::PollTimeout { ticks: 10 }, "poll-timeout"),
            (GatewayError::PollStall { ticks: 5 }, "poll-stall"),
            (
                GatewayError::PollRemoteFailed {
                    status: 30,
                    fail_code: None,
                    message: "failed".into(),
                },
                "poll-remote-failed",
            ),
            (GatewayError::Transport("x".into()), "transport"),
            (GatewayError::Server("x".into()), "server"),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(GatewayError::Transport("dns".into()).is_transport());
        assert!(!GatewayError::Server("500".into()).is_transport());
        assert!(
            !GatewayError::PollRemoteFailed {
                status: 30,
                fail_code: Some("1234".into()),
                message: "failed".into()
            }
            .is_transport()
        );
    }
}
