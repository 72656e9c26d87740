use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::billing::ReconcileError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("reconciliation failed: {0}")]
    Reconcile(ReconcileError),
}

impl From<ReconcileError> for AppError {
    fn from(error: ReconcileError) -> Self {
        if error.is_client_error() {
            AppError::BadRequest(error.to_string())
        } else {
            AppError::Reconcile(error)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Reconcile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::warn!(error = %self);
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
