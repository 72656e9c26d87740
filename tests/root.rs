use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{routing::get, Router};
use coverage_billing::routes::root;
use tower::ServiceExt; // for `oneshot`

#[tokio::test]
async fn root_responds_ok() {
    let app = Router::new().route("/", get(root));
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body, "Coverage Billing API".as_bytes());
}
