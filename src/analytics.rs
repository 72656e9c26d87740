use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::billing::models::Owner;

pub const ACCOUNT_PAID_SUBSCRIPTION: &str = "Account Paid Subscription";
pub const ACCOUNT_CANCELLED_SUBSCRIPTION: &str = "Account Cancelled Subscription";
pub const ACCOUNT_DECREASED_USERS: &str = "Account Decreased Users";
pub const ACCOUNT_INCREASED_USERS: &str = "Account Increased Users";
pub const ACCOUNT_CHANGED_PLAN: &str = "Account Changed Plan";
pub const ACCOUNT_COMPLETED_CHECKOUT: &str = "Account Completed Checkout";
pub const TRIAL_STARTED: &str = "Trial Started";
pub const TRIAL_ENDED: &str = "Trial Ended";

/// key: analytics-event -> product analytics track call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsEvent {
    pub event: &'static str,
    pub user_id: i32,
    /// Organization the acting user was working on behalf of, when that differs.
    pub group_id: Option<i32>,
    pub properties: Value,
}

impl AnalyticsEvent {
    pub fn new(event: &'static str, user_id: i32, properties: Value) -> Self {
        Self {
            event,
            user_id,
            group_id: None,
            properties,
        }
    }

    pub fn on_behalf_of(mut self, org_ownerid: i32) -> Self {
        self.group_id = Some(org_ownerid);
        self
    }
}

/// Side effects a reconciled event asks for once its writes are committed.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Track(AnalyticsEvent),
    Identify { user_id: i32, traits: Value },
}

impl Notification {
    pub fn identify(owner: &Owner) -> Self {
        Notification::Identify {
            user_id: owner.ownerid,
            traits: owner_traits(owner),
        }
    }
}

impl From<AnalyticsEvent> for Notification {
    fn from(event: AnalyticsEvent) -> Self {
        Notification::Track(event)
    }
}

pub fn owner_traits(owner: &Owner) -> Value {
    json!({
        "username": owner.username,
        "email": owner.email,
        "service": owner.service,
        "plan": owner.plan,
        "plan_user_count": owner.plan_user_count,
        "delinquent": owner.delinquent,
        "stripe_customer_id": owner.stripe_customer_id,
        "trial_start_date": owner.trial_start_date,
        "trial_end_date": owner.trial_end_date,
        "updatestamp": owner.updatestamp,
    })
}

/// key: analytics-sink -> fire-and-forget delivery
///
/// Implementations swallow and log their own failures.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn track(&self, event: AnalyticsEvent);
    async fn identify(&self, user_id: i32, traits: Value);

    async fn deliver(&self, notification: Notification) {
        match notification {
            Notification::Track(event) => self.track(event).await,
            Notification::Identify { user_id, traits } => self.identify(user_id, traits).await,
        }
    }
}

/// key: analytics-segment -> Segment HTTP API client
#[derive(Clone)]
pub struct SegmentClient {
    http: Client,
    api_base: String,
    write_key: Option<String>,
}

impl SegmentClient {
    pub fn new(api_base: impl Into<String>, write_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            write_key,
        }
    }

    pub fn enabled(&self) -> bool {
        self.write_key.is_some()
    }

    async fn send(&self, path: &str, body: Value) {
        let Some(write_key) = self.write_key.as_deref() else {
            tracing::debug!(path, "analytics disabled, dropping call");
            return;
        };
        let result = self
            .http
            .post(format!("{}/v1/{}", self.api_base, path))
            .basic_auth(write_key, Some(""))
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status());
        if let Err(error) = result {
            tracing::warn!(%error, path, "failed to deliver analytics call");
        }
    }
}

#[async_trait]
impl AnalyticsSink for SegmentClient {
    async fn track(&self, event: AnalyticsEvent) {
        let mut body = json!({
            "userId": event.user_id.to_string(),
            "event": event.event,
            "properties": event.properties,
            "messageId": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(group_id) = event.group_id {
            body["context"] = json!({ "groupId": group_id.to_string() });
        }
        self.send("track", body).await;
    }

    async fn identify(&self, user_id: i32, traits: Value) {
        let body = json!({
            "userId": user_id.to_string(),
            "traits": traits,
            "messageId": Uuid::new_v4().to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.send("identify", body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn track_posts_event_with_group_context() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/track")
                .json_body_partial(
                    r#"{"userId":"9","event":"Account Changed Plan","context":{"groupId":"4"}}"#,
                );
            then.status(200);
        });

        let client = SegmentClient::new(server.base_url(), Some("write-key".into()));
        client
            .track(
                AnalyticsEvent::new(ACCOUNT_CHANGED_PLAN, 9, json!({"new_plan": "users-pr-inappy"}))
                    .on_behalf_of(4),
            )
            .await;

        mock.assert();
    }

    #[tokio::test]
    async fn delivery_failures_are_swallowed() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/identify");
            then.status(500);
        });

        let client = SegmentClient::new(server.base_url(), Some("write-key".into()));
        client.identify(3, json!({"plan": "users-basic"})).await;

        mock.assert();
    }

    #[tokio::test]
    async fn disabled_client_sends_nothing() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST);
            then.status(200);
        });

        let client = SegmentClient::new(server.base_url(), None);
        assert!(!client.enabled());
        client
            .track(AnalyticsEvent::new(TRIAL_STARTED, 1, json!({})))
            .await;

        mock.assert_hits(0);
    }
}
