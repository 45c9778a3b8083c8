//! Command bridge and state reset through a real axum router

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use testbridge_common::{Configuration, Database, HookPoint, LifecycleHooks};
use testbridge_web::{BridgeStack, CommandBridge, CommandRegistry};

fn config(install_folder: &Path) -> Configuration {
    let mut config = Configuration::default();
    config.install_folder = install_folder.to_path_buf();
    config
}

fn app() -> Router {
    Router::new()
        .route("/", get(|| async { "home" }))
        .route("/api/users", get(|| async { "users" }))
}

fn database() -> Database {
    let db = Database::open_memory().unwrap();
    db.execute_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE posts (id INTEGER PRIMARY KEY, user_id INTEGER REFERENCES users(id), title TEXT);
         CREATE TABLE schema_migrations (version TEXT PRIMARY KEY);
         INSERT INTO schema_migrations VALUES ('20240101000000');",
    )
    .unwrap();
    db
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let body = body.map(|v| Body::from(v.to_string())).unwrap_or_else(Body::empty);
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_reset_on_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let bridge = CommandBridge::builder(&config)
        .with_database(database())
        .build()
        .unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    for path in ["/cypress_rails_reset_state", "/__cypress__/reset_state", "/cypress_rails_reset_state"] {
        let (status, body) = send(&router, "POST", path, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "State reset completed");
    }
}

#[tokio::test]
async fn test_reset_clears_tables_and_fires_hook() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let db = database();
    db.execute_batch(
        "INSERT INTO users (id, name) VALUES (1, 'ada');
         INSERT INTO posts (user_id, title) VALUES (1, 'hello');",
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let hooks = LifecycleHooks::new().on(HookPoint::AfterStateReset, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let bridge = CommandBridge::builder(&config)
        .with_database(db.clone())
        .with_hooks(hooks)
        .build()
        .unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, _) = send(&router, "GET", "/cypress_rails_reset_state", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(db.count_rows("users").unwrap(), 0);
    assert_eq!(db.count_rows("posts").unwrap(), 0);
    assert_eq!(db.count_rows("schema_migrations").unwrap(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unmatched_paths_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let router = BridgeStack::new(config)
        .with_request_tracing()
        .install(app())
        .unwrap();

    assert_eq!(send(&router, "GET", "/", None).await, (StatusCode::OK, "home".to_string()));
    assert_eq!(
        send(&router, "GET", "/api/users", None).await,
        (StatusCode::OK, "users".to_string())
    );
    assert_eq!(send(&router, "GET", "/missing", None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_command_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let router = BridgeStack::new(config).install(app()).unwrap();

    let (status, body) = send(
        &router,
        "POST",
        "/__e2e__/command",
        Some(json!({ "name": "does_not_exist" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("does_not_exist"));
}

#[tokio::test]
async fn test_failing_command_is_server_error_and_server_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let mut registry = CommandRegistry::new();
    registry
        .register_fn("explode", |_ctx, _req| async {
            Err(anyhow::anyhow!("factory failed").context("seeding users"))
        })
        .unwrap();
    registry
        .register_fn("echo", |_ctx, req| async move { Ok(req.options) })
        .unwrap();

    let bridge = CommandBridge::builder(&config).with_registry(registry).build().unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, body) = send(&router, "POST", "/__e2e__/command", Some(json!({ "name": "explode" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["message"], "seeding users");
    assert_eq!(error["backtrace"][0], "caused by: factory failed");

    let (status, body) = send(
        &router,
        "POST",
        "/__cypress__/command",
        Some(json!([{ "name": "echo", "options": { "n": 1 } }, { "name": "echo", "options": "two" }])),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!([{ "n": 1 }, "two"]));

    assert_eq!(send(&router, "GET", "/", None).await.0, StatusCode::OK);
}

struct Inventory {
    widgets: AtomicUsize,
}

#[tokio::test]
async fn test_commands_reach_application_state_and_helper() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("e2e_helper.toml"), "factory_prefix = 'test-'").unwrap();
    let mut config = config(dir.path());
    config.api_prefix = "/api".to_string();

    let inventory = Arc::new(Inventory {
        widgets: AtomicUsize::new(0),
    });

    let mut registry = CommandRegistry::new();
    registry
        .register_fn("add_widgets", |ctx, req| async move {
            let inventory = ctx
                .state::<Inventory>()
                .ok_or_else(|| anyhow::anyhow!("inventory not registered"))?;
            let count = req.options["count"].as_u64().unwrap_or(1) as usize;
            let total = inventory.widgets.fetch_add(count, Ordering::SeqCst) + count;
            let prefix = ctx.helper().get_str("factory_prefix").unwrap_or_default().to_string();
            Ok(json!({ "total": total, "prefix": prefix }))
        })
        .unwrap();

    let bridge = CommandBridge::builder(&config)
        .with_registry(registry)
        .with_state(inventory.clone())
        .build()
        .unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, body) = send(&router, "POST", "/api/__e2e__/command/add_widgets", Some(json!({ "count": 3 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        serde_json::from_str::<Value>(&body).unwrap(),
        json!([{ "total": 3, "prefix": "test-" }])
    );
    assert_eq!(inventory.widgets.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_sql_scripts_from_app_commands() {
    let dir = tempfile::tempdir().unwrap();
    let commands = dir.path().join("app_commands/scenarios");
    std::fs::create_dir_all(&commands).unwrap();
    std::fs::write(
        commands.join("basic.sql"),
        "INSERT INTO users (id, name) VALUES (1, 'ada');
         INSERT INTO posts (user_id, title) VALUES (1, 'first');",
    )
    .unwrap();

    let config = config(dir.path());
    let db = database();
    let bridge = CommandBridge::builder(&config).with_database(db.clone()).build().unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, body) = send(
        &router,
        "POST",
        "/__e2e__/command",
        Some(json!({ "name": "scenarios/basic" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(db.count_rows("posts").unwrap(), 1);

    // Same script again violates the users primary key
    let (status, body) = send(&router, "POST", "/__e2e__/command/scenarios/basic", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("UNIQUE"), "{body}");

    let (status, _) = send(&router, "POST", "/__e2e__/command/../app_commands/scenarios/basic", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_before_request_short_circuits_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let bridge = CommandBridge::builder(&config)
        .before_request(|parts| {
            let authorized = parts
                .headers
                .get("authorization")
                .map(|v| v == "Bearer e2e")
                .unwrap_or(false);
            if authorized {
                None
            } else {
                Some((StatusCode::UNAUTHORIZED, "unauthorized").into_response())
            }
        })
        .build()
        .unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, _) = send(&router, "POST", "/__e2e__/command", Some(json!({ "name": "seed" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/__e2e__/command")
        .header("authorization", "Bearer e2e")
        .body(Body::from(json!({ "name": "seed" }).to_string()))
        .unwrap();
    let response: Response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_both_vcr_layers_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.use_vcr_middleware = true;
    config.use_vcr_use_cassette_middleware = true;

    let err = BridgeStack::new(config).install(app()).unwrap_err();
    assert!(err.to_string().contains("only one VCR middleware"));
}

#[tokio::test]
async fn test_panicking_command_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let mut registry = CommandRegistry::new();
    registry
        .register_fn("seed_broken", |_ctx, _req| async {
            let user: Option<u32> = None;
            Ok(json!({ "id": user.unwrap() }))
        })
        .unwrap();
    registry
        .register_fn("echo", |_ctx, req| async move { Ok(req.options) })
        .unwrap();

    let bridge = CommandBridge::builder(&config).with_registry(registry).build().unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let (status, body) = send(&router, "POST", "/__e2e__/command", Some(json!({ "name": "seed_broken" }))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = serde_json::from_str(&body).unwrap();
    assert!(error["message"].as_str().unwrap().contains("command panicked"), "{body}");

    let (status, body) = send(&router, "POST", "/__e2e__/command/echo", Some(json!({ "n": 2 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!([{ "n": 2 }]));
}

#[tokio::test]
async fn test_named_command_rejects_malformed_options() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();

    let mut registry = CommandRegistry::new();
    registry
        .register_fn("seed", move |_ctx, _req| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        })
        .unwrap();

    let bridge = CommandBridge::builder(&config).with_registry(registry).build().unwrap();
    let router = BridgeStack::new(config).with_bridge(bridge).install(app()).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/__e2e__/command/seed")
        .body(Body::from("{count: 2"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}
