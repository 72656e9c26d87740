use axum::{body::Bytes, extract::Extension, http::HeaderMap, http::StatusCode};

use super::constants::STRIPE_SIGNATURE_HEADER;
use super::webhook::WebhookReconciler;
use crate::error::AppResult;

/// key: billing-webhook-api -> signed provider deliveries
pub async fn stripe_webhook(
    Extension(reconciler): Extension<WebhookReconciler>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<StatusCode> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let outcome = reconciler.handle(&body, signature).await?;
    Ok(outcome.status())
}
