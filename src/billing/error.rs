use thiserror::Error;

use super::signature::SignatureError;
use super::stripe::ProviderError;

/// key: billing-reconcile-error -> webhook failure taxonomy
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("event object is missing `{0}`")]
    MissingField(&'static str),
    #[error("owner not found for {0}")]
    OwnerNotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ReconcileError {
    /// Rejected before any state was read or written.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ReconcileError::Signature(_)
                | ReconcileError::Payload(_)
                | ReconcileError::MissingField(_)
        )
    }
}
