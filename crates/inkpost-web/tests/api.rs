use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use inkpost_core::account::AccountUpdate;
use inkpost_core::ratelimit::{CounterError, WindowHit};
use inkpost_core::{
    CounterStore, CredentialStore, HashCost, InMemoryCounterStore, InMemoryCredentialStore,
    ManualClock, Notifier, NotifyError,
};
use inkpost_web::config::{ScopeOverride, ServerConfig};
use inkpost_web::state::{AppState, Dependencies};
use serde_json::{json, Value};
use tower::ServiceExt;

// --- Test doubles ---

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl Outbox {
    fn code_for(&self, to: &str) -> String {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent
            .iter()
            .rev()
            .find(|(addr, _)| addr == to)
            .expect("no mail sent to address");
        body.split(|c: char| !c.is_ascii_digit())
            .find(|run| run.len() == 6)
            .expect("no code in mail")
            .to_string()
    }

    fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for Outbox {
    async fn send(&self, to: &str, _subject: &str, body: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("connection refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), body.to_string()));
        Ok(())
    }
}

struct DownCounters;

#[async_trait]
impl CounterStore for DownCounters {
    async fn hit(&self, _: &str, _: Duration, _: SystemTime) -> Result<WindowHit, CounterError> {
        Err(CounterError::Unavailable("connection reset".to_string()))
    }

    async fn release(&self, _: &str, _: SystemTime) -> Result<(), CounterError> {
        Err(CounterError::Unavailable("connection reset".to_string()))
    }
}

// --- Harness ---

struct TestApp {
    router: Router,
    outbox: Arc<Outbox>,
    store: Arc<InMemoryCredentialStore>,
    clock: Arc<ManualClock>,
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.auth.jwt_secret = "api-test-secret-api-test-secret-0123".to_string();
    let cost = HashCost::minimal();
    config.auth.hash_memory_kib = cost.memory_kib;
    config.auth.hash_iterations = cost.iterations;
    config.auth.hash_parallelism = cost.parallelism;
    config.rate_limit.trust_proxy = true;
    config
}

fn app_with(config: ServerConfig, counters: Option<Arc<dyn CounterStore>>) -> TestApp {
    let outbox = Arc::new(Outbox::default());
    let store = Arc::new(InMemoryCredentialStore::new());
    let clock = Arc::new(ManualClock::starting_now());
    let deps = Dependencies {
        store: store.clone(),
        notifier: outbox.clone(),
        counters: counters
            .unwrap_or_else(|| Arc::new(InMemoryCounterStore::new()) as Arc<dyn CounterStore>),
        clock: clock.clone(),
    };
    let state = AppState::new(config, deps).unwrap();
    TestApp {
        router: inkpost_web::build_router(state).unwrap(),
        outbox,
        store,
        clock,
    }
}

fn app() -> TestApp {
    app_with(test_config(), None)
}

fn post(uri: &str, ip: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, ip: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-forwarded-for", ip);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, headers, body)
}

const IP: &str = "203.0.113.10";

fn registration(username: &str, email: &str) -> Value {
    json!({ "username": username, "email": email, "password": "Passw0rd" })
}

async fn register(app: &TestApp, username: &str, email: &str) -> String {
    let (status, _, body) = send(app, post("/api/auth/register", IP, registration(username, email))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["userId"].as_str().unwrap().to_string()
}

async fn verified_login(app: &TestApp, username: &str, email: &str) -> (String, String) {
    let id = register(app, username, email).await;
    let code = app.outbox.code_for(email);
    let (status, _, _) = send(
        app,
        post("/api/auth/verify-email", IP, json!({ "email": email, "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, body) = send(
        app,
        post("/api/auth/login", IP, json!({ "username": username, "password": "Passw0rd" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    (id, body["token"].as_str().unwrap().to_string())
}

async fn ban(app: &TestApp, id: &str) {
    app.store
        .update_fields(
            id,
            AccountUpdate {
                is_banned: Some(true),
                ..AccountUpdate::default()
            },
        )
        .await
        .unwrap();
}

// --- Lifecycle ---

#[tokio::test]
async fn register_verify_login_me() {
    let app = app();

    let id = register(&app, "alice", "a@x.com").await;

    let (status, _, body) = send(
        &app,
        post("/api/auth/login", IP, json!({ "username": "alice", "password": "Passw0rd" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Please verify your email first.");

    let code = app.outbox.code_for("a@x.com");
    let wrong = if code == "123456" { "654321" } else { "123456" };
    let (status, _, body) = send(
        &app,
        post("/api/auth/verify-email", IP, json!({ "email": "a@x.com", "code": wrong })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "status": 400, "message": "Invalid or expired code" }));

    let (status, _, _) = send(
        &app,
        post("/api/auth/verify-email", IP, json!({ "email": "a@x.com", "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(
        &app,
        post("/api/auth/login", IP, json!({ "username": "alice", "password": "Passw0rd" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountId"], id.as_str());
    assert_eq!(body["role"], "user");
    let token = body["token"].as_str().unwrap();

    let (status, _, body) = send(&app, get("/api/auth/me", IP, Some(token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "id": id, "username": "alice", "role": "user", "avatar": null })
    );
}

#[tokio::test]
async fn register_reports_first_validation_problem() {
    let app = app();
    let (status, _, body) = send(
        &app,
        post(
            "/api/auth/register",
            IP,
            json!({ "username": "al", "email": "nope", "password": "x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Username must be between 3-20 characters");
    assert_eq!(app.outbox.count(), 0);
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = app();
    let req = Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", IP)
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn duplicate_and_banned_registrations() {
    let app = app();
    let id = register(&app, "alice", "a@x.com").await;

    let (status, _, body) = send(
        &app,
        post("/api/auth/register", IP, registration("Alice", "other@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "This username or email is already taken");

    ban(&app, &id).await;
    let (status, _, body) = send(
        &app,
        post("/api/auth/register", IP, registration("bob", "a@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This account has been banned.");
}

#[tokio::test]
async fn undeliverable_code_leaves_no_account() {
    let app = app();
    app.outbox.failing.store(true, Ordering::SeqCst);
    let (status, _, body) = send(
        &app,
        post("/api/auth/register", IP, registration("alice", "a@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Mail could not be sent.");
    assert!(app.store.is_empty().await);
}

#[tokio::test]
async fn login_failures_are_uniform() {
    let app = app();
    verified_login(&app, "alice", "a@x.com").await;

    let (s1, _, unknown) = send(
        &app,
        post("/api/auth/login", IP, json!({ "username": "nobody", "password": "Passw0rd" })),
    )
    .await;
    let (s2, _, wrong) = send(
        &app,
        post("/api/auth/login", IP, json!({ "username": "alice", "password": "Wr0ngpass" })),
    )
    .await;
    assert_eq!(s1, StatusCode::BAD_REQUEST);
    assert_eq!(s2, StatusCode::BAD_REQUEST);
    assert_eq!(unknown, wrong);
}

// --- Password reset ---

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() {
    let app = app();
    register(&app, "alice", "a@x.com").await;

    let (s1, _, known) = send(
        &app,
        post("/api/auth/forgot-password", IP, json!({ "email": "a@x.com" })),
    )
    .await;
    let (s2, _, unknown) = send(
        &app,
        post("/api/auth/forgot-password", IP, json!({ "email": "ghost@x.com" })),
    )
    .await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);
    assert_eq!(known, unknown);
}

#[tokio::test]
async fn reset_password_end_to_end() {
    let app = app();
    verified_login(&app, "alice", "a@x.com").await;

    send(
        &app,
        post("/api/auth/forgot-password", IP, json!({ "email": "a@x.com" })),
    )
    .await;
    let code = app.outbox.code_for("a@x.com");

    let reset = json!({ "email": "a@x.com", "code": code, "newPassword": "N3wPassword" });
    let (status, _, _) = send(&app, post("/api/auth/reset-password", IP, reset.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(&app, post("/api/auth/reset-password", IP, reset)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(
        &app,
        post("/api/auth/login", IP, json!({ "username": "alice", "password": "N3wPassword" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// --- Session gating ---

#[tokio::test]
async fn me_requires_a_valid_token() {
    let app = app();

    let (status, _, body) = send(&app, get("/api/auth/me", IP, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token not found");

    let (status, _, body) = send(&app, get("/api/auth/me", IP, Some("garbage"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let app = app();
    let (_, token) = verified_login(&app, "alice", "a@x.com").await;
    app.clock.advance(Duration::from_secs(72 * 3600));
    let (status, _, _) = send(&app, get("/api/auth/me", IP, Some(&token))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn banned_after_login_loses_access() {
    let app = app();
    let (id, token) = verified_login(&app, "alice", "a@x.com").await;
    ban(&app, &id).await;
    let (status, _, body) = send(&app, get("/api/auth/me", IP, Some(&token))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This account has been banned.");
}

#[tokio::test]
async fn public_profile_hides_credentials() {
    let app = app();
    let id = register(&app, "alice", "a@x.com").await;

    let (status, _, body) = send(&app, get(&format!("/api/users/{id}"), IP, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert!(body.get("password_hash").is_none());
    assert!(body.get("email").is_none());
    assert!(body.get("verification").is_none());

    let (status, _, _) = send(&app, get("/api/users/missing", IP, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- Rate limiting ---

#[tokio::test]
async fn register_scope_caps_per_ip_and_resets() {
    let app = app();
    for i in 0..5 {
        let (status, headers, _) = send(
            &app,
            post(
                "/api/auth/register",
                IP,
                registration(&format!("user{i}"), &format!("u{i}@x.com")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(headers["ratelimit-limit"], "5");
        assert_eq!(headers["ratelimit-remaining"], (4 - i).to_string().as_str());
    }

    let (status, headers, body) = send(
        &app,
        post("/api/auth/register", IP, registration("user5", "u5@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(headers.contains_key(header::RETRY_AFTER));
    assert_eq!(
        body,
        json!({ "status": 429, "message": "Too many auth attempts. Please try again later" })
    );
    assert_eq!(app.store.len().await, 5);

    let (status, _, _) = send(
        &app,
        post("/api/auth/register", "198.51.100.7", registration("user5", "u5@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    app.clock.advance(Duration::from_secs(600));
    let (status, _, _) = send(
        &app,
        post("/api/auth/register", IP, registration("user6", "u6@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn successful_logins_are_not_counted() {
    let app = app();
    verified_login(&app, "alice", "a@x.com").await;
    let good = json!({ "username": "alice", "password": "Passw0rd" });
    let bad = json!({ "username": "alice", "password": "Wr0ngpass" });

    for _ in 0..8 {
        let (status, _, _) = send(&app, post("/api/auth/login", IP, good.clone())).await;
        assert_eq!(status, StatusCode::OK);
    }

    for _ in 0..5 {
        let (status, _, _) = send(&app, post("/api/auth/login", IP, bad.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    let (status, _, _) = send(&app, post("/api/auth/login", IP, good.clone())).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Keyed by username as well as address.
    let other = json!({ "username": "bob", "password": "Wr0ngpass" });
    let (status, _, _) = send(&app, post("/api/auth/login", IP, other)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ipv6_clients_share_their_subnet_budget() {
    let app = app();
    for i in 0..5 {
        let ip = format!("2001:db8:abcd:12{i:02x}::{i}");
        let (status, _, _) = send(
            &app,
            post(
                "/api/auth/register",
                &ip,
                registration(&format!("user{i}"), &format!("u{i}@x.com")),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let (status, _, _) = send(
        &app,
        post(
            "/api/auth/register",
            "2001:db8:abcd:12ff::1",
            registration("user9", "u9@x.com"),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn email_scope_is_keyed_by_address_and_email() {
    let app = app();
    let forgot = |email: &str| post("/api/auth/forgot-password", IP, json!({ "email": email }));

    for _ in 0..5 {
        let (status, _, _) = send(&app, forgot("a@x.com")).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, headers, _) = send(&app, forgot("A@X.com")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers["ratelimit-limit"], "5");

    // Same budget across every route in the scope.
    let (status, _, _) = send(
        &app,
        post("/api/auth/verify-email", IP, json!({ "email": "a@x.com", "code": "123456" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    let (status, _, _) = send(&app, forgot("b@x.com")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = send(
        &app,
        post("/api/auth/forgot-password", "198.51.100.7", json!({ "email": "a@x.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    app.clock.advance(Duration::from_secs(600));
    let (status, _, _) = send(&app, forgot("a@x.com")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn authenticated_reads_are_keyed_by_account() {
    let mut config = test_config();
    config.rate_limit.scopes.insert(
        "read:user".to_string(),
        ScopeOverride {
            max: Some(3),
            ..ScopeOverride::default()
        },
    );
    let app = app_with(config, None);
    let (_, alice) = verified_login(&app, "alice", "a@x.com").await;
    let (_, bob) = verified_login(&app, "bob", "b@x.com").await;

    let (status, headers, _) = send(&app, get("/api/auth/me", IP, Some(&alice))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["ratelimit-limit"], "3");
    assert_eq!(headers["ratelimit-remaining"], "2");

    for ip in ["198.51.100.7", "2001:db8::1"] {
        let (status, _, _) = send(&app, get("/api/auth/me", ip, Some(&alice))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _, _) = send(&app, get("/api/auth/me", "192.0.2.44", Some(&alice))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // Another account from the same address has its own budget.
    let (status, _, _) = send(&app, get("/api/auth/me", IP, Some(&bob))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn counter_outage_fails_closed_for_auth_and_open_for_reads() {
    let app = app_with(test_config(), Some(Arc::new(DownCounters)));

    let (status, _, body) = send(
        &app,
        post("/api/auth/register", IP, registration("alice", "a@x.com")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Internal Server Error");
    assert!(app.store.is_empty().await);
    assert_eq!(app.outbox.count(), 0);

    // Global and read scopes admit; the handler itself answers.
    let (status, _, _) = send(&app, get("/api/users/missing", IP, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// --- Response hygiene ---

#[tokio::test]
async fn security_headers_on_every_response() {
    let app = app();
    let (_, headers, _) = send(&app, get("/api/auth/me", IP, None)).await;
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(!headers.contains_key("strict-transport-security"));
}
