pub mod api;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod owners;
pub mod plan;
pub mod signature;
pub mod stripe;
pub mod webhook;

pub use api::stripe_webhook;
pub use constants::{is_pro_plan, StripeWebhookEvent, PRO_PLANS};
pub use error::ReconcileError;
pub use events::{StripeEvent, Subscription};
pub use models::{Owner, TrialStatus};
pub use plan::PlanService;
pub use signature::{sign_payload, verify_signature, SignatureError};
pub use stripe::{BillingProvider, ProviderError, StripeClient};
pub use webhook::{WebhookOutcome, WebhookReconciler, WebhookSettings};
