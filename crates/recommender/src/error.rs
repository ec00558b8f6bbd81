use actix_web::{http::StatusCode, HttpResponse, ResponseError};

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Debug, thiserror::Error)]
pub enum RecommenderError {
    #[error("Unknown recommendation algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Invalid limit {0}: limit must be a positive integer")]
    InvalidLimit(i64),

    #[error("{collaborator} unreachable: {reason}")]
    CollaboratorUnreachable {
        collaborator: &'static str,
        reason: String,
    },

    #[error("{collaborator} did not respond within {timeout_ms}ms")]
    Timeout {
        collaborator: &'static str,
        timeout_ms: u64,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RecommenderError {
    /// Invalid-request errors are the caller's fault and never retried
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            RecommenderError::UnknownAlgorithm(_) | RecommenderError::InvalidLimit(_)
        )
    }
}

impl From<anyhow::Error> for RecommenderError {
    fn from(err: anyhow::Error) -> Self {
        RecommenderError::Internal(format!("{:#}", err))
    }
}

impl From<config::ConfigError> for RecommenderError {
    fn from(err: config::ConfigError) -> Self {
        RecommenderError::Config(err.to_string())
    }
}

impl ResponseError for RecommenderError {
    fn status_code(&self) -> StatusCode {
        if self.is_invalid_request() {
            return StatusCode::BAD_REQUEST;
        }
        match self {
            RecommenderError::CollaboratorUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RecommenderError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if self.is_invalid_request() {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "invalid_request",
                "error_description": self.to_string()
            }));
        }
        match self {
            RecommenderError::CollaboratorUnreachable { .. } | RecommenderError::Timeout { .. } => {
                HttpResponse::build(self.status_code()).json(serde_json::json!({
                    "error": "collaborator_unreachable",
                    "error_description": self.to_string(),
                    "data": []
                }))
            }
            _ => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal_error",
                "error_description": self.to_string()
            })),
        }
    }
}
