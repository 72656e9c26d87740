use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{routing::get, Router};
use axum_prometheus::PrometheusMetricLayer;
use coverage_billing::routes::api_routes;
use tower::ServiceExt;

#[tokio::test]
async fn metrics_render_after_webhook_traffic() {
    let (layer, handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/metrics", get(move || async move { handle.render() }))
        .merge(api_routes())
        .layer(layer);

    // No reconciler extension: the request fails, but it is still counted.
    let webhook = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/billing/stripe/webhooks")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(webhook.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
