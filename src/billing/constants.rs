use std::fmt;

/// Header carrying the provider signature on webhook deliveries.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

/// key: billing-plans -> paid tiers a subscription may move an owner onto
pub const PRO_PLANS: [&str; 4] = [
    "users-pr-inappm",
    "users-pr-inappy",
    "users-inappm",
    "users-inappy",
];

pub const DEFAULT_PLAN_NAME: &str = "users-basic";
pub const DEFAULT_PLAN_USER_COUNT: i32 = 1;
pub const TRIAL_DAYS: i64 = 14;

pub fn is_pro_plan(name: Option<&str>) -> bool {
    name.map(|name| PRO_PLANS.contains(&name)).unwrap_or(false)
}

/// key: billing-webhook-events -> subscribed provider event types
///
/// The set of variants is the allow-list; anything that does not parse is acknowledged
/// without processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StripeWebhookEvent {
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    CustomerSubscriptionDeleted,
    CustomerCreated,
    CustomerUpdated,
    CustomerSubscriptionCreated,
    CustomerSubscriptionUpdated,
    CheckoutSessionCompleted,
    SubscriptionScheduleCreated,
    SubscriptionScheduleReleased,
    SubscriptionScheduleUpdated,
}

impl StripeWebhookEvent {
    pub const ALL: [StripeWebhookEvent; 11] = [
        StripeWebhookEvent::InvoicePaymentSucceeded,
        StripeWebhookEvent::InvoicePaymentFailed,
        StripeWebhookEvent::CustomerSubscriptionDeleted,
        StripeWebhookEvent::CustomerCreated,
        StripeWebhookEvent::CustomerUpdated,
        StripeWebhookEvent::CustomerSubscriptionCreated,
        StripeWebhookEvent::CustomerSubscriptionUpdated,
        StripeWebhookEvent::CheckoutSessionCompleted,
        StripeWebhookEvent::SubscriptionScheduleCreated,
        StripeWebhookEvent::SubscriptionScheduleReleased,
        StripeWebhookEvent::SubscriptionScheduleUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StripeWebhookEvent::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            StripeWebhookEvent::InvoicePaymentFailed => "invoice.payment_failed",
            StripeWebhookEvent::CustomerSubscriptionDeleted => "customer.subscription.deleted",
            StripeWebhookEvent::CustomerCreated => "customer.created",
            StripeWebhookEvent::CustomerUpdated => "customer.updated",
            StripeWebhookEvent::CustomerSubscriptionCreated => "customer.subscription.created",
            StripeWebhookEvent::CustomerSubscriptionUpdated => "customer.subscription.updated",
            StripeWebhookEvent::CheckoutSessionCompleted => "checkout.session.completed",
            StripeWebhookEvent::SubscriptionScheduleCreated => "subscription_schedule.created",
            StripeWebhookEvent::SubscriptionScheduleReleased => "subscription_schedule.released",
            StripeWebhookEvent::SubscriptionScheduleUpdated => "subscription_schedule.updated",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.as_str() == value)
    }
}

impl fmt::Display for StripeWebhookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscribed_tag_parses_back() {
        for event in StripeWebhookEvent::ALL {
            assert_eq!(StripeWebhookEvent::from_str(event.as_str()), Some(event));
        }
    }

    #[test]
    fn unsubscribed_tags_are_rejected() {
        assert_eq!(StripeWebhookEvent::from_str("invoice.created"), None);
        assert_eq!(StripeWebhookEvent::from_str("invoice_payment_succeeded"), None);
        assert_eq!(StripeWebhookEvent::from_str(""), None);
    }

    #[test]
    fn pro_plan_allow_list() {
        assert!(is_pro_plan(Some("users-pr-inappy")));
        assert!(!is_pro_plan(Some("users-free")));
        assert!(!is_pro_plan(None));
    }
}
