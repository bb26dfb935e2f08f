use crate::engine::EngineError;
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FacilitatorError>;

#[derive(Error, Debug)]
pub enum FacilitatorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Secret resolution error: {0}")]
    SecretResolution(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement engine error: {0}")]
    Engine(#[from] EngineError),

    /// Carries the human-readable ceiling, e.g. `1 per 1 minute`
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for FacilitatorError {
    fn from(err: config::ConfigError) -> Self {
        FacilitatorError::Configuration(err.to_string())
    }
}

impl From<security::SecretsError> for FacilitatorError {
    fn from(err: security::SecretsError) -> Self {
        FacilitatorError::SecretResolution(err.to_string())
    }
}

impl From<serde_json::Error> for FacilitatorError {
    fn from(err: serde_json::Error) -> Self {
        FacilitatorError::Internal(format!("JSON serialization error: {}", err))
    }
}

impl ResponseError for FacilitatorError {
    fn error_response(&self) -> HttpResponse {
        let body = match self {
            FacilitatorError::RateLimitExceeded(limit) => json!({
                "error": format!("Rate limit exceeded: {}", limit)
            }),
            FacilitatorError::NotFound(message) | FacilitatorError::BadRequest(message) => {
                json!({ "detail": message })
            }
            FacilitatorError::Engine(EngineError::BadRequest(message)) => {
                json!({ "detail": message })
            }
            // Internal detail stays in the logs
            _ => json!({ "detail": "Internal server error" }),
        };

        HttpResponse::build(self.status_code()).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            FacilitatorError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FacilitatorError::SecretResolution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FacilitatorError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FacilitatorError::Engine(EngineError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            FacilitatorError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FacilitatorError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            FacilitatorError::NotFound(_) => StatusCode::NOT_FOUND,
            FacilitatorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FacilitatorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl FacilitatorError {
    /// Label for the error counters
    pub fn kind(&self) -> &'static str {
        match self {
            FacilitatorError::Configuration(_) => "configuration",
            FacilitatorError::SecretResolution(_) => "secret_resolution",
            FacilitatorError::Database(_) => "database",
            FacilitatorError::Engine(EngineError::BadRequest(_)) => "bad_request",
            FacilitatorError::Engine(_) => "engine",
            FacilitatorError::RateLimitExceeded(_) => "rate_limit",
            FacilitatorError::NotFound(_) => "not_found",
            FacilitatorError::BadRequest(_) => "bad_request",
            FacilitatorError::Internal(_) => "internal",
        }
    }
}
