use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::identity::AuthError;
use crate::store::StoreError;
use crate::validation::FieldError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Invalid(#[from] FieldError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    NotFound(String),

    #[error("You are not a member of this group.")]
    NotMember,

    #[error("Please log in to continue.")]
    Unauthenticated,

    #[error("The request timed out.")]
    Timeout,

    #[error("Live updates ended unexpectedly.")]
    Interrupted,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => AppError::NotFound(message),
            other => AppError::Store(other),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Auth(AuthError::EmailInUse) => StatusCode::CONFLICT,
            AppError::Auth(AuthError::InvalidCredentials | AuthError::InvalidSession) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Auth(AuthError::WeakPassword | AuthError::InvalidEmail) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Auth(AuthError::Signing | AuthError::Store(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotMember => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::SEE_OTHER,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Interrupted => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            // Field errors belong to the form, not the logs
            AppError::Invalid(field_error) => HttpResponse::build(status).json(field_error),
            AppError::Unauthenticated => HttpResponse::build(status)
                .insert_header((header::LOCATION, "/login"))
                .json(json!({ "error": self.to_string() })),
            _ => {
                if status.is_server_error() {
                    error!("{self}");
                } else {
                    warn!("{self}");
                }
                HttpResponse::build(status).json(json!({ "error": self.to_string() }))
            }
        }
    }
}
