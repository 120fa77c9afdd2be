use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::notifications::NotifyError;

/// Errors surfaced by HTTP handlers. Rendered with the same envelope as
/// successful responses so clients can branch on `success`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("{0}")]
    Internal(String),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    status_code: u16,
    data: Option<()>,
    message: &'a str,
    success: bool,
    errors: Vec<String>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let message = match self {
            ApiError::Database(e) => {
                error!("Database error: {}", e);
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        };
        HttpResponse::build(status).json(ErrorBody {
            status_code: status.as_u16(),
            data: None,
            message: &message,
            success: false,
            errors: Vec::new(),
        })
    }
}

impl From<bson::ser::Error> for ApiError {
    fn from(e: bson::ser::Error) -> Self {
        ApiError::Internal(format!("Error serializing document: {}", e))
    }
}

impl From<NotifyError> for ApiError {
    fn from(e: NotifyError) -> Self {
        match e {
            NotifyError::NotFound(what) => ApiError::NotFound(format!("{} not found", capitalize(what))),
            NotifyError::Store(StoreError::Mongo(e)) => ApiError::Database(e),
            NotifyError::Mail(e) => ApiError::Internal(format!("Failed to send email: {}", e)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Successful response envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub status_code: u16,
    pub data: T,
    pub message: String,
    pub success: bool,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            data,
            message: message.into(),
            success: status.is_success(),
        }
    }

    pub fn ok(data: T, message: impl Into<String>) -> HttpResponse {
        HttpResponse::Ok().json(Self::new(StatusCode::OK, data, message))
    }

    pub fn created(data: T, message: impl Into<String>) -> HttpResponse {
        HttpResponse::Created().json(Self::new(StatusCode::CREATED, data, message))
    }
}

/// Failures talking to the task and account stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
}
