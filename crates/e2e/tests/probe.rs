//! Readiness probe against in-process HTTP servers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;

use testbridge_e2e::probe::{ReadinessProbe, POLL_INTERVAL};
use testbridge_e2e::supervisor::find_free_port;
use testbridge_e2e::E2eError;

async fn serve(router: Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    port
}

#[tokio::test]
async fn ready_on_success_status() {
    let port = serve(Router::new().route("/", get(|| async { "ok" }))).await;

    let probe = ReadinessProbe::new().unwrap();
    probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(5))
        .await
        .unwrap();
}

#[tokio::test]
async fn redirect_counts_as_ready() {
    // The redirect target does not exist; following it would never succeed
    let port = serve(Router::new().route("/", get(|| async { Redirect::temporary("/login") }))).await;

    let probe = ReadinessProbe::new().unwrap();
    probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(2))
        .await
        .unwrap();
}

#[tokio::test]
async fn server_errors_are_retried_until_ready() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let router = Router::new().route(
        "/health",
        get(move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::OK
                }
            }
        }),
    );
    let port = serve(router).await;

    let probe = ReadinessProbe::new().unwrap();
    probe
        .wait_until_ready(&format!("http://127.0.0.1:{port}/health"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn times_out_when_never_ready() {
    let router = Router::new().route("/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let port = serve(router).await;

    let limit = Duration::from_millis(600);
    let start = Instant::now();
    let result = ReadinessProbe::new()
        .unwrap()
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), limit)
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(E2eError::ReadinessTimeout { .. })));
    assert!(elapsed >= limit);
    assert!(elapsed < limit + POLL_INTERVAL + Duration::from_millis(400));
}

#[tokio::test]
async fn times_out_when_nothing_listens() {
    let port = find_free_port().unwrap();

    let limit = Duration::from_millis(500);
    let start = Instant::now();
    let result = ReadinessProbe::new()
        .unwrap()
        .wait_until_ready(&format!("http://127.0.0.1:{port}/"), limit)
        .await;

    match result {
        Err(E2eError::ReadinessTimeout { host, port: p, elapsed }) => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(p, port);
            assert!(elapsed >= limit);
        }
        other => panic!("expected readiness timeout, got {other:?}"),
    }
    assert!(start.elapsed() < limit + POLL_INTERVAL + Duration::from_millis(400));
}
