mod common;

use axum::http::StatusCode;

#[tokio::test]
async fn health_reports_connected_database() {
    let ctx = common::test_context().await;
    let response = common::get(&ctx.app, "/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["database"], "connected");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn health_does_not_start_a_session() {
    let ctx = common::test_context().await;
    let response = common::get(&ctx.app, "/health", None).await;
    assert!(response.session.is_none());
    assert!(ctx.flow.sessions().is_empty());
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let ctx = common::test_context().await;
    let response = common::get(&ctx.app, "/nonexistent", None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}
