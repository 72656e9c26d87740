use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use thiserror::Error;

use super::events::Subscription;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("billing provider api key is not configured")]
    MissingApiKey,
    #[error("billing provider request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("billing provider returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// key: billing-provider -> outbound subscription management
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str)
        -> Result<Subscription, ProviderError>;

    async fn modify_subscription_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError>;

    /// Attaches the payment method to the customer and makes it the default for both
    /// the customer's invoices and the subscription.
    async fn update_payment_method(
        &self,
        customer_id: &str,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError>;
}

/// key: billing-provider-stripe -> REST client over reqwest
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl StripeClient {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::MissingApiKey)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(self.api_key()?)
            .form(form)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<StripeErrorEnvelope>(&text)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or(text);
    Err(ProviderError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl BillingProvider for StripeClient {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Subscription, ProviderError> {
        let response = self
            .http
            .get(self.url(&format!("subscriptions/{subscription_id}")))
            .bearer_auth(self.api_key()?)
            .send()
            .await?;
        let subscription = check_status(response).await?.json::<Subscription>().await?;
        Ok(subscription)
    }

    async fn modify_subscription_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError> {
        self.post_form(
            &format!("subscriptions/{subscription_id}"),
            &[("default_payment_method", payment_method_id)],
        )
        .await
    }

    async fn update_payment_method(
        &self,
        customer_id: &str,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError> {
        self.post_form(
            &format!("payment_methods/{payment_method_id}/attach"),
            &[("customer", customer_id)],
        )
        .await?;
        self.post_form(
            &format!("customers/{customer_id}"),
            &[("invoice_settings[default_payment_method]", payment_method_id)],
        )
        .await?;
        self.modify_subscription_payment_method(subscription_id, payment_method_id)
            .await
    }
}
