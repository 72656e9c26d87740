use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{error, info, warn};

use super::constants::{is_pro_plan, StripeWebhookEvent};
use super::error::ReconcileError;
use super::events::{
    CheckoutSession, Customer, Invoice, StripeEvent, Subscription, SubscriptionSchedule,
};
use super::models::TrialStatus;
use super::owners;
use super::plan::PlanService;
use super::signature::verify_signature;
use super::stripe::BillingProvider;
use crate::analytics::{
    AnalyticsEvent, AnalyticsSink, Notification, ACCOUNT_CANCELLED_SUBSCRIPTION,
    ACCOUNT_CHANGED_PLAN, ACCOUNT_COMPLETED_CHECKOUT, ACCOUNT_DECREASED_USERS,
    ACCOUNT_INCREASED_USERS, ACCOUNT_PAID_SUBSCRIPTION, TRIAL_ENDED, TRIAL_STARTED,
};
use crate::config;

/// key: billing-webhook-settings -> signing secret, tolerance, price map
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub endpoint_secret: Option<String>,
    pub tolerance_secs: i64,
    /// Plan name -> provider price id.
    pub plan_ids: BTreeMap<String, String>,
}

impl WebhookSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint_secret: config::STRIPE_ENDPOINT_SECRET.clone(),
            tolerance_secs: *config::STRIPE_WEBHOOK_TOLERANCE_SECS,
            plan_ids: config::STRIPE_PLAN_IDS.clone(),
        }
    }

    pub fn plan_name_for_price(&self, price_id: &str) -> Option<&str> {
        self.plan_ids
            .iter()
            .find(|(_, price)| price.as_str() == price_id)
            .map(|(name, _)| name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Processed(StripeWebhookEvent),
    Unsupported(String),
}

impl WebhookOutcome {
    pub fn status(&self) -> StatusCode {
        StatusCode::NO_CONTENT
    }
}

type Notifications = Vec<Notification>;

/// key: billing-webhook-reconciler -> provider events onto owner state
///
/// Each handler runs its writes in one transaction and hands back the notifications it
/// wants sent. Notifications go out only after the commit.
#[derive(Clone)]
pub struct WebhookReconciler {
    pool: PgPool,
    provider: Arc<dyn BillingProvider>,
    analytics: Arc<dyn AnalyticsSink>,
    settings: Arc<WebhookSettings>,
}

impl WebhookReconciler {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn BillingProvider>,
        analytics: Arc<dyn AnalyticsSink>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            pool,
            provider,
            analytics,
            settings: Arc::new(settings),
        }
    }

    pub async fn handle(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, ReconcileError> {
        if self.settings.endpoint_secret.is_none() {
            error!("Stripe endpoint secret improperly configured -- webhooks will not be processed");
        }
        verify_signature(
            body,
            signature,
            self.settings.endpoint_secret.as_deref(),
            self.settings.tolerance_secs,
            Utc::now().timestamp(),
        )
        .map_err(|err| {
            warn!(error = %err, "Stripe webhook event received with invalid signature");
            ReconcileError::from(err)
        })?;

        let event: StripeEvent = serde_json::from_slice(body)?;
        let Some(kind) = StripeWebhookEvent::from_str(&event.event_type) else {
            warn!(
                stripe_webhook_event = %event.event_type,
                "Unsupported Stripe webhook event received, exiting"
            );
            return Ok(WebhookOutcome::Unsupported(event.event_type));
        };

        info!(
            stripe_webhook_event = %kind,
            stripe_event_id = %event.id,
            stripe_event_created = ?event.created,
            "Stripe webhook event received"
        );

        let notifications = self.dispatch(kind, &event).await?;
        for notification in notifications {
            self.analytics.deliver(notification).await;
        }
        Ok(WebhookOutcome::Processed(kind))
    }

    async fn dispatch(
        &self,
        kind: StripeWebhookEvent,
        event: &StripeEvent,
    ) -> Result<Notifications, ReconcileError> {
        match kind {
            StripeWebhookEvent::InvoicePaymentSucceeded => {
                self.invoice_payment_succeeded(event.object()?).await
            }
            StripeWebhookEvent::InvoicePaymentFailed => {
                self.invoice_payment_failed(event.object()?).await
            }
            StripeWebhookEvent::CustomerSubscriptionDeleted => {
                self.customer_subscription_deleted(event.object()?).await
            }
            StripeWebhookEvent::SubscriptionScheduleCreated => {
                self.subscription_schedule_created(event.object()?).await
            }
            StripeWebhookEvent::SubscriptionScheduleUpdated => {
                self.subscription_schedule_updated(event.object()?).await
            }
            StripeWebhookEvent::SubscriptionScheduleReleased => {
                self.subscription_schedule_released(event.object()?).await
            }
            StripeWebhookEvent::CustomerCreated => self.customer_created(event.object()?),
            StripeWebhookEvent::CustomerSubscriptionCreated => {
                self.customer_subscription_created(event.object()?).await
            }
            StripeWebhookEvent::CustomerSubscriptionUpdated => {
                self.customer_subscription_updated(event.object()?, event)
                    .await
            }
            StripeWebhookEvent::CustomerUpdated => self.customer_updated(event.object()?).await,
            StripeWebhookEvent::CheckoutSessionCompleted => {
                self.checkout_session_completed(event.object()?).await
            }
        }
    }

    async fn invoice_payment_succeeded(
        &self,
        invoice: Invoice,
    ) -> Result<Notifications, ReconcileError> {
        info!(
            stripe_customer_id = %invoice.customer,
            stripe_subscription_id = ?invoice.subscription,
            "Setting delinquency status False"
        );
        let mut tx = self.pool.begin().await?;
        let owner = owners::find_by_stripe_ids(
            &mut tx,
            &invoice.customer,
            invoice.subscription.as_deref(),
        )
        .await?
        .ok_or_else(|| {
            customer_not_found(&invoice.customer, invoice.subscription.as_deref())
        })?;
        owners::set_delinquent(&mut tx, owner.ownerid, false).await?;
        tx.commit().await?;

        log_updated(1);
        Ok(vec![AnalyticsEvent::new(
            ACCOUNT_PAID_SUBSCRIPTION,
            owner.ownerid,
            json!({ "plan": owner.plan }),
        )
        .into()])
    }

    async fn invoice_payment_failed(&self, invoice: Invoice) -> Result<Notifications, ReconcileError> {
        info!(
            stripe_customer_id = %invoice.customer,
            stripe_subscription_id = ?invoice.subscription,
            "Setting delinquency status True"
        );
        let mut conn = self.pool.acquire().await?;
        let updated = owners::mark_delinquent(
            &mut conn,
            &invoice.customer,
            invoice.subscription.as_deref(),
        )
        .await?;
        log_updated(updated);
        Ok(Vec::new())
    }

    async fn customer_subscription_deleted(
        &self,
        subscription: Subscription,
    ) -> Result<Notifications, ReconcileError> {
        info!(
            stripe_subscription_id = %subscription.id,
            stripe_customer_id = %subscription.customer,
            "Setting free plan and deactivating repos for stripe customer"
        );
        let mut tx = self.pool.begin().await?;
        let mut owner = owners::find_by_stripe_ids(
            &mut tx,
            &subscription.customer,
            Some(&subscription.id),
        )
        .await?
        .ok_or_else(|| customer_not_found(&subscription.customer, Some(&subscription.id)))?;

        PlanService::new(&mut owner)
            .set_default_plan_data(&mut tx)
            .await?;
        let deactivated = owners::deactivate_repositories(&mut tx, owner.ownerid).await?;
        tx.commit().await?;

        info!(ownerid = owner.ownerid, deactivated, "Repositories deactivated");
        log_updated(1);
        Ok(vec![AnalyticsEvent::new(
            ACCOUNT_CANCELLED_SUBSCRIPTION,
            owner.ownerid,
            json!({ "plan": subscription.plan_name() }),
        )
        .into()])
    }

    async fn subscription_schedule_created(
        &self,
        schedule: SubscriptionSchedule,
    ) -> Result<Notifications, ReconcileError> {
        let Some(subscription_id) = schedule.subscription.as_deref() else {
            warn!(schedule_id = %schedule.id, "Schedule created without a subscription");
            return Ok(Vec::new());
        };
        match self.provider.retrieve_subscription(subscription_id).await {
            Ok(subscription) => info!(
                stripe_customer_id = %subscription.customer,
                stripe_subscription_id = %subscription.id,
                ownerid = ?subscription.metadata.obo_organization,
                "Schedule created for customer with -- plan: {:?}, quantity {:?}",
                subscription.plan_name(),
                subscription.quantity,
            ),
            Err(err) => warn!(
                error = %err,
                stripe_subscription_id = subscription_id,
                "Could not retrieve subscription for created schedule"
            ),
        }
        Ok(Vec::new())
    }

    async fn subscription_schedule_updated(
        &self,
        schedule: SubscriptionSchedule,
    ) -> Result<Notifications, ReconcileError> {
        let Some(subscription_id) = schedule.subscription.as_deref() else {
            return Ok(Vec::new());
        };
        let Some(scheduled) = schedule.scheduled_plan() else {
            warn!(schedule_id = %schedule.id, "Schedule updated without a scheduled phase");
            return Ok(Vec::new());
        };
        let Some(plan_name) = self.settings.plan_name_for_price(&scheduled.plan) else {
            warn!(
                schedule_id = %schedule.id,
                price_id = %scheduled.plan,
                "Schedule updated with a price that maps to no plan"
            );
            return Ok(Vec::new());
        };

        match self.provider.retrieve_subscription(subscription_id).await {
            Ok(subscription) => info!(
                stripe_customer_id = %subscription.customer,
                stripe_subscription_id = %subscription.id,
                ownerid = ?subscription.metadata.obo_organization,
                "Schedule updated for customer with -- plan: {plan_name}, quantity {:?}",
                scheduled.quantity,
            ),
            Err(err) => warn!(
                error = %err,
                stripe_subscription_id = subscription_id,
                plan = plan_name,
                "Could not retrieve subscription for updated schedule"
            ),
        }
        Ok(Vec::new())
    }

    async fn subscription_schedule_released(
        &self,
        schedule: SubscriptionSchedule,
    ) -> Result<Notifications, ReconcileError> {
        let released = schedule
            .released_subscription
            .as_deref()
            .ok_or(ReconcileError::MissingField("released_subscription"))?;
        let subscription = self.provider.retrieve_subscription(released).await?;
        let ownerid = subscription.metadata.organization_id().ok_or_else(|| {
            ReconcileError::OwnerNotFound(format!(
                "obo_organization={:?}",
                subscription.metadata.obo_organization
            ))
        })?;

        let mut tx = self.pool.begin().await?;
        let mut owner = owners::find_by_id(&mut tx, ownerid)
            .await?
            .ok_or_else(|| ReconcileError::OwnerNotFound(format!("ownerid={ownerid}")))?;

        let requesting_user_id = subscription.metadata.requesting_user_id();
        let acting_user = requesting_user_id.unwrap_or(owner.ownerid);
        let item = subscription.items.data.first();
        let new_quantity = item.and_then(|item| item.quantity);
        let new_plan = item.and_then(|item| item.plan.name.clone());

        let mut notifications = Notifications::new();
        let mut plan_service = PlanService::new(&mut owner);
        if let (Some(old_quantity), Some(new_quantity)) = (
            plan_service.plan_user_count().filter(|count| *count > 0),
            new_quantity,
        ) {
            let details = json!({
                "new_quantity": new_quantity,
                "old_quantity": old_quantity,
                "plan": new_plan,
            });
            if old_quantity > new_quantity {
                notifications.push(
                    AnalyticsEvent::new(ACCOUNT_DECREASED_USERS, acting_user, details)
                        .on_behalf_of(ownerid)
                        .into(),
                );
            } else if old_quantity < new_quantity {
                notifications.push(
                    AnalyticsEvent::new(ACCOUNT_INCREASED_USERS, acting_user, details)
                        .on_behalf_of(ownerid)
                        .into(),
                );
            }
        }

        if plan_service.plan_name() != new_plan.as_deref() {
            notifications.push(
                AnalyticsEvent::new(
                    ACCOUNT_CHANGED_PLAN,
                    acting_user,
                    json!({
                        "new_plan": new_plan,
                        "previous_plan": plan_service.plan_name(),
                    }),
                )
                .on_behalf_of(ownerid)
                .into(),
            );
        }

        plan_service
            .update_plan(&mut tx, subscription.plan_name(), subscription.quantity)
            .await?;
        tx.commit().await?;

        info!(
            ownerid,
            requesting_user_id = ?requesting_user_id,
            "Stripe subscription modified successfully for owner {ownerid}"
        );
        Ok(notifications)
    }

    fn customer_created(&self, customer: Customer) -> Result<Notifications, ReconcileError> {
        // No owner id arrives with this event; linkage waits for the subscription.
        info!(stripe_customer_id = %customer.id, "Customer created");
        Ok(Vec::new())
    }

    async fn customer_subscription_created(
        &self,
        subscription: Subscription,
    ) -> Result<Notifications, ReconcileError> {
        if subscription.plan.id.is_none() {
            warn!(
                stripe_customer_id = %subscription.customer,
                ownerid = ?subscription.metadata.obo_organization,
                "Subscription created missing plan id, exiting"
            );
            return Ok(Vec::new());
        }
        if !is_pro_plan(subscription.plan_name()) {
            warn!(
                stripe_customer_id = %subscription.customer,
                ownerid = ?subscription.metadata.obo_organization,
                "Subscription creation requested for invalid plan '{:?}' -- doing nothing",
                subscription.plan_name(),
            );
            return Ok(Vec::new());
        }

        info!(
            stripe_customer_id = %subscription.customer,
            stripe_subscription_id = %subscription.id,
            ownerid = ?subscription.metadata.obo_organization,
            "Subscription created for customer with -- plan: {:?}, quantity {:?}",
            subscription.plan_name(),
            subscription.quantity,
        );
        let ownerid = subscription.metadata.organization_id().ok_or_else(|| {
            ReconcileError::OwnerNotFound(format!(
                "obo_organization={:?}",
                subscription.metadata.obo_organization
            ))
        })?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut owner = owners::find_by_id(&mut tx, ownerid)
            .await?
            .ok_or_else(|| ReconcileError::OwnerNotFound(format!("ownerid={ownerid}")))?;
        owners::link_stripe_ids(&mut tx, ownerid, &subscription.customer, &subscription.id)
            .await?;
        owner.stripe_customer_id = Some(subscription.customer.clone());
        owner.stripe_subscription_id = Some(subscription.id.clone());

        let mut notifications = Notifications::new();
        let mut plan_service = PlanService::new(&mut owner);
        plan_service
            .update_plan(&mut tx, subscription.plan_name(), subscription.quantity)
            .await?;

        if subscription.is_status("trialing") {
            notifications.push(
                AnalyticsEvent::new(TRIAL_STARTED, ownerid, trial_details(&subscription)).into(),
            );
            if plan_service.trial_status(now) == TrialStatus::NotStarted {
                plan_service.start_trial(&mut tx, now).await?;
            }
        }
        tx.commit().await?;

        log_updated(1);
        Ok(notifications)
    }

    async fn customer_subscription_updated(
        &self,
        subscription: Subscription,
        event: &StripeEvent,
    ) -> Result<Notifications, ReconcileError> {
        // Provider calls happen before the row is locked.
        let mut conn = self.pool.acquire().await?;
        owners::find_by_stripe_ids(&mut conn, &subscription.customer, Some(&subscription.id))
            .await?
            .ok_or_else(|| customer_not_found(&subscription.customer, Some(&subscription.id)))?;
        drop(conn);

        // Checkout completion lands here with the card it collected.
        if let Some(payment_method) = subscription.default_payment_method.as_deref() {
            self.provider
                .update_payment_method(&subscription.customer, &subscription.id, payment_method)
                .await?;
        }

        if let Some(schedule_id) = subscription.schedule.as_deref() {
            info!(
                stripe_subscription_id = %subscription.id,
                schedule_id,
                "Subscription has a pending schedule -- leaving plan untouched"
            );
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut owner = owners::find_by_stripe_ids(
            &mut tx,
            &subscription.customer,
            Some(&subscription.id),
        )
        .await?
        .ok_or_else(|| customer_not_found(&subscription.customer, Some(&subscription.id)))?;

        let ownerid = owner.ownerid;
        let mut plan_service = PlanService::new(&mut owner);
        if subscription.is_status("incomplete_expired") {
            info!(
                stripe_subscription_id = %subscription.id,
                "Subscription updated with status change to 'incomplete_expired' -- cancelling to free"
            );
            plan_service.set_default_plan_data(&mut tx).await?;
            owners::deactivate_repositories(&mut tx, ownerid).await?;
            tx.commit().await?;
            return Ok(Vec::new());
        }

        if !is_pro_plan(subscription.plan_name()) {
            warn!(
                stripe_subscription_id = %subscription.id,
                "Subscription update requested with invalid plan {:?} -- doing nothing",
                subscription.plan_name(),
            );
            return Ok(Vec::new());
        }

        info!(
            stripe_subscription_id = %subscription.id,
            "Subscription updated with -- plan: {:?}, quantity: {:?}",
            subscription.plan_name(),
            subscription.quantity,
        );

        let mut notifications = Notifications::new();
        if event.previous_status() == Some("trialing") {
            notifications.push(
                AnalyticsEvent::new(TRIAL_ENDED, ownerid, trial_details(&subscription)).into(),
            );
        }
        plan_service
            .update_plan(&mut tx, subscription.plan_name(), subscription.quantity)
            .await?;
        tx.commit().await?;

        notifications.push(Notification::identify(&owner));
        log_updated(1);
        Ok(notifications)
    }

    async fn customer_updated(&self, customer: Customer) -> Result<Notifications, ReconcileError> {
        let Some(default_payment_method) = customer.invoice_settings.default_payment_method.as_deref()
        else {
            info!(
                customer_id = %customer.id,
                "Customer has no default payment method -- subscriptions left as they are"
            );
            return Ok(Vec::new());
        };

        for subscription in customer.stale_subscriptions() {
            info!(
                customer_id = %customer.id,
                subscription_id = %subscription.id,
                "Customer updated their payment method, updating the subscription payment as well"
            );
            self.provider
                .modify_subscription_payment_method(&subscription.id, default_payment_method)
                .await?;
        }
        Ok(Vec::new())
    }

    async fn checkout_session_completed(
        &self,
        session: CheckoutSession,
    ) -> Result<Notifications, ReconcileError> {
        info!(
            ownerid = ?session.client_reference_id,
            "Checkout session completed"
        );
        let ownerid = session.owner_id().ok_or_else(|| {
            ReconcileError::OwnerNotFound(format!(
                "client_reference_id={:?}",
                session.client_reference_id
            ))
        })?;

        let mut tx = self.pool.begin().await?;
        let owner = owners::find_by_id(&mut tx, ownerid)
            .await?
            .ok_or_else(|| ReconcileError::OwnerNotFound(format!("ownerid={ownerid}")))?;
        owners::link_customer(&mut tx, owner.ownerid, session.customer.as_deref()).await?;
        tx.commit().await?;

        let plan = session.plan_name();
        if plan.is_none() {
            warn!(
                ownerid,
                "Could not find plan in checkout.session.completed event"
            );
        }

        log_updated(1);
        Ok(vec![AnalyticsEvent::new(
            ACCOUNT_COMPLETED_CHECKOUT,
            owner.ownerid,
            json!({ "plan": plan, "userid_type": "org" }),
        )
        .into()])
    }
}

fn trial_details(subscription: &Subscription) -> serde_json::Value {
    json!({
        "trial_plan_name": subscription.plan_name(),
        "trial_plan_user_count": subscription.quantity,
        "trial_end_date": subscription.trial_end_at(),
        "trial_start_date": subscription.trial_start_at(),
    })
}

fn customer_not_found(customer_id: &str, subscription_id: Option<&str>) -> ReconcileError {
    ReconcileError::OwnerNotFound(format!(
        "stripe_customer_id={customer_id}, stripe_subscription_id={subscription_id:?}"
    ))
}

fn log_updated(updated: u64) {
    if updated >= 1 {
        info!("Successfully updated info for {updated} customer(s)");
    } else {
        warn!("Could not find customer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> WebhookSettings {
        WebhookSettings {
            endpoint_secret: Some("whsec_test".into()),
            tolerance_secs: 300,
            plan_ids: config::default_plan_ids(),
        }
    }

    #[test]
    fn price_ids_resolve_to_plan_names() {
        let settings = settings();
        assert_eq!(
            settings.plan_name_for_price("price_1Gv2COGlVGuVgOrkuOYVLIj7"),
            Some("users-pr-inappy")
        );
        assert_eq!(settings.plan_name_for_price("price_unknown"), None);
    }

    #[test]
    fn every_outcome_acknowledges_with_no_content() {
        assert_eq!(
            WebhookOutcome::Unsupported("invoice.created".into()).status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            WebhookOutcome::Processed(StripeWebhookEvent::CustomerCreated).status(),
            StatusCode::NO_CONTENT
        );
    }
}
