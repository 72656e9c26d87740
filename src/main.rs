use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use coverage_billing::analytics::{AnalyticsSink, SegmentClient};
use coverage_billing::billing::{BillingProvider, StripeClient, WebhookReconciler, WebhookSettings};
use coverage_billing::config;
use coverage_billing::routes::{api_routes, root};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await
        .context("connecting to the database")?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error).context("running database migrations");
        }
    }

    let provider: Arc<dyn BillingProvider> = Arc::new(StripeClient::new(
        config::STRIPE_API_BASE.as_str(),
        config::STRIPE_API_KEY.clone(),
    ));
    let segment = SegmentClient::new(
        config::SEGMENT_API_BASE.as_str(),
        config::SEGMENT_WRITE_KEY.clone(),
    );
    if !segment.enabled() {
        tracing::info!("SEGMENT_WRITE_KEY not set; analytics calls will be dropped");
    }
    let analytics: Arc<dyn AnalyticsSink> = Arc::new(segment);
    let reconciler =
        WebhookReconciler::new(pool.clone(), provider, analytics, WebhookSettings::from_env());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(reconciler));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("parsing bind address")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
