use axum::{routing::post, Router};

use crate::billing;

pub async fn root() -> &'static str {
    "Coverage Billing API"
}

pub fn api_routes() -> Router {
    Router::new().route("/billing/stripe/webhooks", post(billing::stripe_webhook))
}
