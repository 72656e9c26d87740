use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// key: billing-event-envelope -> signed provider delivery
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: Value,
    #[serde(default)]
    pub previous_attributes: Option<Value>,
}

impl StripeEvent {
    /// Decodes `data.object` into the shape the handler for this event expects.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }

    /// `status` as it was before this event, taken from the event's own delta.
    pub fn previous_status(&self) -> Option<&str> {
        self.data
            .previous_attributes
            .as_ref()
            .and_then(|previous| previous.get("status"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: Option<String>,
    pub customer: String,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionPlan {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionMetadata {
    /// Owner id of the organization the subscription pays for.
    #[serde(default)]
    pub obo_organization: Option<String>,
    /// Owner id of the user who made the change.
    #[serde(default)]
    pub obo: Option<String>,
}

impl SubscriptionMetadata {
    pub fn organization_id(&self) -> Option<i32> {
        parse_ownerid(self.obo_organization.as_deref())
    }

    pub fn requesting_user_id(&self) -> Option<i32> {
        parse_ownerid(self.obo.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub plan: SubscriptionPlan,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// key: billing-subscription-object -> provider subscription snapshot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Subscription {
    pub id: String,
    pub customer: String,
    #[serde(default)]
    pub plan: SubscriptionPlan,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: SubscriptionMetadata,
    #[serde(default)]
    pub default_payment_method: Option<String>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl Subscription {
    pub fn is_status(&self, status: &str) -> bool {
        self.status.as_deref() == Some(status)
    }

    pub fn plan_name(&self) -> Option<&str> {
        self.plan.name.as_deref()
    }

    pub fn trial_start_at(&self) -> Option<DateTime<Utc>> {
        self.trial_start.and_then(unix_to_datetime)
    }

    pub fn trial_end_at(&self) -> Option<DateTime<Utc>> {
        self.trial_end.and_then(unix_to_datetime)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulePhasePlan {
    /// Provider price id.
    pub plan: String,
    #[serde(default)]
    pub quantity: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulePhase {
    #[serde(default)]
    pub plans: Vec<SchedulePhasePlan>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSchedule {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub released_subscription: Option<String>,
    #[serde(default)]
    pub phases: Vec<SchedulePhase>,
}

impl SubscriptionSchedule {
    /// The plan the schedule moves to: the first plan of the second phase.
    pub fn scheduled_plan(&self) -> Option<&SchedulePhasePlan> {
        self.phases.get(1).and_then(|phase| phase.plans.first())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerSubscriptionRef {
    pub id: String,
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerSubscriptions {
    #[serde(default)]
    pub data: Vec<CustomerSubscriptionRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub invoice_settings: InvoiceSettings,
    #[serde(default)]
    pub subscriptions: Option<CustomerSubscriptions>,
}

impl Customer {
    /// Subscriptions whose payment method differs from the customer's invoice default.
    pub fn stale_subscriptions(&self) -> impl Iterator<Item = &CustomerSubscriptionRef> {
        let default = self.invoice_settings.default_payment_method.as_deref();
        self.subscriptions
            .iter()
            .flat_map(|subscriptions| subscriptions.data.iter())
            .filter(move |subscription| subscription.default_payment_method.as_deref() != default)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub display_items: Value,
}

impl CheckoutSession {
    pub fn owner_id(&self) -> Option<i32> {
        parse_ownerid(self.client_reference_id.as_deref())
    }

    /// Plan name of the first display item, if the payload carries one.
    pub fn plan_name(&self) -> Option<&str> {
        self.display_items
            .get(0)?
            .get("plan")?
            .get("name")?
            .as_str()
    }
}

fn parse_ownerid(raw: Option<&str>) -> Option<i32> {
    raw.and_then(|value| value.trim().parse::<i32>().ok())
}

fn unix_to_datetime(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}
