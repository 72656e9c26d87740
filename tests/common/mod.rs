#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use coverage_billing::analytics::{AnalyticsEvent, AnalyticsSink, Notification};
use coverage_billing::billing::{
    sign_payload, BillingProvider, ProviderError, Subscription, WebhookReconciler,
    WebhookSettings,
};
use coverage_billing::config;
use serde_json::Value;
use sqlx::PgPool;

pub const ENDPOINT_SECRET: &str = "whsec_test_secret";

#[derive(Default)]
pub struct RecordingSink {
    pub notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter_map(|notification| match notification {
                Notification::Track(event) => Some(event.clone()),
                Notification::Identify { .. } => None,
            })
            .collect()
    }

    pub fn event_names(&self) -> Vec<&'static str> {
        self.events().iter().map(|event| event.event).collect()
    }

    pub fn identified(&self) -> Vec<i32> {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter_map(|notification| match notification {
                Notification::Identify { user_id, .. } => Some(*user_id),
                Notification::Track(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn track(&self, event: AnalyticsEvent) {
        self.notifications.lock().unwrap().push(event.into());
    }

    async fn identify(&self, user_id: i32, traits: Value) {
        self.notifications
            .lock()
            .unwrap()
            .push(Notification::Identify { user_id, traits });
    }
}

/// Answers `retrieve_subscription` from a canned object and records every call.
#[derive(Default)]
pub struct FakeProvider {
    pub subscription: Mutex<Option<Value>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn returning(subscription: Value) -> Self {
        Self {
            subscription: Mutex::new(Some(subscription)),
            calls: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<Subscription, ProviderError> {
        self.record(format!("retrieve {subscription_id}"));
        let subscription = self.subscription.lock().unwrap().clone();
        match subscription {
            Some(value) => Ok(serde_json::from_value(value).unwrap()),
            None => Err(ProviderError::Api {
                status: 404,
                message: format!("No such subscription: '{subscription_id}'"),
            }),
        }
    }

    async fn modify_subscription_payment_method(
        &self,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError> {
        self.record(format!("modify {subscription_id} {payment_method_id}"));
        Ok(())
    }

    async fn update_payment_method(
        &self,
        customer_id: &str,
        subscription_id: &str,
        payment_method_id: &str,
    ) -> Result<(), ProviderError> {
        self.record(format!(
            "update {customer_id} {subscription_id} {payment_method_id}"
        ));
        Ok(())
    }
}

pub struct Harness {
    pub reconciler: WebhookReconciler,
    pub provider: Arc<FakeProvider>,
    pub analytics: Arc<RecordingSink>,
}

pub fn harness(pool: PgPool, provider: FakeProvider) -> Harness {
    let provider = Arc::new(provider);
    let analytics = Arc::new(RecordingSink::default());
    let reconciler = WebhookReconciler::new(
        pool,
        provider.clone(),
        analytics.clone(),
        settings(),
    );
    Harness {
        reconciler,
        provider,
        analytics,
    }
}

pub fn settings() -> WebhookSettings {
    WebhookSettings {
        endpoint_secret: Some(ENDPOINT_SECRET.to_string()),
        tolerance_secs: 300,
        plan_ids: config::default_plan_ids(),
    }
}

pub fn event(event_type: &str, object: Value, previous_attributes: Option<Value>) -> Vec<u8> {
    let mut data = serde_json::json!({ "object": object });
    if let Some(previous) = previous_attributes {
        data["previous_attributes"] = previous;
    }
    serde_json::to_vec(&serde_json::json!({
        "id": "evt_test",
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": data,
    }))
    .unwrap()
}

pub fn signed(body: &[u8]) -> String {
    sign_payload(body, ENDPOINT_SECRET, Utc::now().timestamp())
}

pub struct OwnerSeed<'a> {
    pub plan: &'a str,
    pub plan_user_count: i32,
    pub stripe_customer_id: Option<&'a str>,
    pub stripe_subscription_id: Option<&'a str>,
}

pub async fn insert_owner(pool: &PgPool, seed: OwnerSeed<'_>) -> i32 {
    sqlx::query_scalar(
        r#"
        INSERT INTO owners (username, email, plan, plan_user_count, plan_activated_users,
                            stripe_customer_id, stripe_subscription_id)
        VALUES ('codecov-org', 'billing@example.com', $1, $2, ARRAY[7, 8], $3, $4)
        RETURNING ownerid
        "#,
    )
    .bind(seed.plan)
    .bind(seed.plan_user_count)
    .bind(seed.stripe_customer_id)
    .bind(seed.stripe_subscription_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn insert_repo(pool: &PgPool, ownerid: i32, name: &str) -> i32 {
    sqlx::query_scalar(
        "INSERT INTO repos (ownerid, name, active, activated) VALUES ($1, $2, TRUE, TRUE) RETURNING repoid",
    )
    .bind(ownerid)
    .bind(name)
    .fetch_one(pool)
    .await
    .unwrap()
}
