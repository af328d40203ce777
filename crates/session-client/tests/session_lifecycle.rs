//! End-to-end session lifecycle against an in-process mock backend.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use session_auth::{
    Claims, CredentialPair, CredentialStore, LOGIN_PATH, ME_PATH, REFRESH_PATH, REGISTER_PATH,
    REVOKE_PATH, now_millis,
};
use session_client::{ApiRequest, Error, LoginRequest, RegisterRequest, SessionClient};
use tokio::net::TcpListener;

const CLIENTS_PATH: &str = "/api/clients";

/// Mock identity + CRUD backend. Access tokens in `valid` are accepted.
#[derive(Default)]
struct Backend {
    valid: Mutex<HashSet<String>>,
    login_calls: AtomicUsize,
    login_saw_authorization: AtomicBool,
    register_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    revoke_authorization: Mutex<Option<String>>,
    clients_calls: AtomicUsize,
    reject_refresh: AtomicBool,
    always_reject: AtomicBool,
    refresh_delay_ms: AtomicU64,
}

impl Backend {
    fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some(token) = bearer(headers) else {
            return false;
        };
        self.valid.lock().unwrap().contains(&token)
    }

    fn issue(&self, access: &str, refresh: &str) -> Json<serde_json::Value> {
        self.valid.lock().unwrap().insert(access.to_string());
        Json(serde_json::json!({
            "accessToken": access,
            "refreshToken": refresh,
            "expiresIn": 3600
        }))
    }

    /// Simulate access credential expiry server-side.
    fn expire_all(&self) {
        self.valid.lock().unwrap().clear();
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn login(
    State(b): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    b.login_calls.fetch_add(1, Ordering::SeqCst);
    if headers.contains_key("authorization") {
        b.login_saw_authorization.store(true, Ordering::SeqCst);
    }
    if body["password"] != "correct horse" {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    b.issue("at_login", "rt_login").into_response()
}

async fn register(State(b): State<Arc<Backend>>) -> Response {
    b.register_calls.fetch_add(1, Ordering::SeqCst);
    b.issue("at_register", "rt_register").into_response()
}

async fn refresh(State(b): State<Arc<Backend>>) -> Response {
    let n = b.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    let delay = b.refresh_delay_ms.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(delay)).await;
    if b.reject_refresh.load(Ordering::SeqCst) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"message": "Refresh token revoked"})),
        )
            .into_response();
    }
    b.issue(&format!("at_r{n}"), &format!("rt_r{n}")).into_response()
}

async fn revoke(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Json<serde_json::Value> {
    b.revoke_calls.fetch_add(1, Ordering::SeqCst);
    *b.revoke_authorization.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Json(serde_json::json!({"message": "Token revoked"}))
}

async fn me(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    if !b.accepts(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!({"email": "ada@example.com", "roles": ["Admin", "User"]})).into_response()
}

async fn clients(State(b): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    b.clients_calls.fetch_add(1, Ordering::SeqCst);
    if b.always_reject.load(Ordering::SeqCst) || !b.accepts(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(serde_json::json!([{"name": "Acme Stables"}])).into_response()
}

async fn start_backend(backend: Arc<Backend>) -> String {
    let app = axum::Router::new()
        .route(LOGIN_PATH, post(login))
        .route(REGISTER_PATH, post(register))
        .route(REFRESH_PATH, post(refresh))
        .route(REVOKE_PATH, post(revoke))
        .route(ME_PATH, get(me))
        .route(CLIENTS_PATH, get(clients))
        .with_state(backend);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    dir: tempfile::TempDir,
    base: String,
    backend: Arc<Backend>,
    client: SessionClient,
}

async fn harness() -> Harness {
    harness_with(reqwest::Client::new()).await
}

async fn harness_with(http: reqwest::Client) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(Backend::default());
    let base = start_backend(backend.clone()).await;
    let client = SessionClient::with_http_client(
        http,
        &base,
        dir.path().join("session.json"),
    )
    .await
    .unwrap();
    Harness {
        dir,
        base,
        backend,
        client,
    }
}

fn credentials(password: &str) -> LoginRequest {
    LoginRequest {
        email: "ada@example.com".into(),
        password: password.into(),
    }
}

async fn logged_in() -> Harness {
    let h = harness().await;
    h.client.login(credentials("correct horse")).await.unwrap();
    h
}

#[tokio::test]
async fn login_persists_pair_and_authenticates() {
    let h = harness().await;
    let before = now_millis();

    let snapshot = h.client.login(credentials("correct horse")).await.unwrap();

    assert!(snapshot.authenticated);
    assert!(h.client.is_admin(), "claims loaded from /me after login");
    let stored = h.client.store().load().await.unwrap();
    assert_eq!(stored.pair.access_token.expose(), "at_login");
    assert_eq!(stored.pair.refresh_token.expose(), "rt_login");
    assert!(stored.pair.expires_at >= before + 3_600_000);
    assert!(stored.pair.expires_at <= now_millis() + 3_600_000);
    assert_eq!(
        stored.claims,
        Some(Claims::new("ada@example.com", ["Admin", "User"]))
    );
}

#[tokio::test]
async fn wrong_password_changes_nothing() {
    let h = harness().await;

    let err = h.client.login(credentials("wrong")).await.unwrap_err();

    assert!(matches!(err, Error::InvalidCredentials(_)), "got: {err:?}");
    assert!(!h.client.is_authenticated());
    assert!(h.client.store().load().await.is_none());
}

#[tokio::test]
async fn registration_gate_blocks_before_network() {
    let h = harness().await;
    let request = RegisterRequest {
        email: "ada@example.com".into(),
        password: "secret1".into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
    };

    let err = h.client.register(request, "secret2").await.unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.backend.register_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn registration_logs_in() {
    let h = harness().await;
    let request = RegisterRequest {
        email: "ada@example.com".into(),
        password: "secret1".into(),
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
    };

    h.client.register(request, "secret1").await.unwrap();

    assert!(h.client.is_authenticated());
    assert_eq!(
        h.client.store().access_token().await.unwrap().expose(),
        "at_register"
    );
}

#[tokio::test]
async fn unauthorized_call_is_renewed_and_replayed_once() {
    let h = logged_in().await;
    h.backend.expire_all();

    let response = h.client.gateway().send(&ApiRequest::get(CLIENTS_PATH)).await.unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body[0]["name"], "Acme Stables");
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.clients_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        h.client.store().access_token().await.unwrap().expose(),
        "at_r1"
    );
    assert!(h.client.is_admin(), "roles survive renewal");
}

#[tokio::test]
async fn rejected_refresh_logs_out() {
    let h = logged_in().await;
    h.backend.expire_all();
    h.backend.reject_refresh.store(true, Ordering::SeqCst);

    let err = h
        .client
        .gateway()
        .send(&ApiRequest::get(CLIENTS_PATH))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RenewalFailed(_)), "got: {err:?}");
    assert!(h.client.store().load().await.is_none());
    assert!(!h.client.is_authenticated());
    assert!(!h.client.is_admin());
}

#[tokio::test]
async fn second_unauthorized_is_surfaced_verbatim() {
    let h = logged_in().await;
    h.backend.always_reject.store(true, Ordering::SeqCst);

    let response = h.client.gateway().send(&ApiRequest::get(CLIENTS_PATH)).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.clients_calls.load(Ordering::SeqCst), 2);
    assert!(h.client.is_authenticated(), "renewal itself succeeded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_calls_share_one_refresh() {
    let h = logged_in().await;
    h.backend.expire_all();
    h.backend.refresh_delay_ms.store(150, Ordering::SeqCst);

    let mut handles = vec![];
    for _ in 0..10 {
        let gateway = h.client.gateway().clone();
        handles.push(tokio::spawn(async move {
            gateway
                .send(&ApiRequest::get(CLIENTS_PATH))
                .await
                .map(|r| r.status().as_u16())
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 200);
    }
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.clients_calls.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn login_endpoint_bypasses_credential_and_renewal() {
    let h = logged_in().await;
    h.backend.login_saw_authorization.store(false, Ordering::SeqCst);

    let request = ApiRequest::post(LOGIN_PATH)
        .json(&serde_json::json!({"email": "ada@example.com", "password": "wrong"}))
        .unwrap();
    let response = h.client.gateway().send(&request).await.unwrap();

    assert_eq!(response.status(), 401);
    assert!(!h.backend.login_saw_authorization.load(Ordering::SeqCst));
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 0);
    assert!(h.client.is_authenticated());
}

#[tokio::test]
async fn anonymous_unauthorized_is_returned_without_renewal() {
    let h = harness().await;

    let response = h.client.gateway().send(&ApiRequest::get(CLIENTS_PATH)).await.unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn logout_revokes_then_clears_and_is_idempotent() {
    let h = logged_in().await;

    h.client.logout().await.unwrap();
    assert_eq!(h.backend.revoke_calls.load(Ordering::SeqCst), 1);
    assert!(h.client.store().load().await.is_none());
    assert!(!h.client.is_authenticated());

    h.client.logout().await.unwrap();
    assert_eq!(h.backend.revoke_calls.load(Ordering::SeqCst), 1);
    assert!(!h.client.is_authenticated());
}

#[tokio::test]
async fn logout_revokes_with_bearer_credential() {
    let h = logged_in().await;

    h.client.logout().await.unwrap();

    assert_eq!(
        h.backend.revoke_authorization.lock().unwrap().as_deref(),
        Some("Bearer at_login")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logout_during_renewal_wins() {
    let h = logged_in().await;
    h.backend.expire_all();
    h.backend.refresh_delay_ms.store(300, Ordering::SeqCst);

    let gateway = h.client.gateway().clone();
    let pending = tokio::spawn(async move { gateway.send(&ApiRequest::get(CLIENTS_PATH)).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.client.coordinator().is_renewing().await);
    h.client.logout().await.unwrap();
    assert!(!h.client.is_authenticated());

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::RenewalFailed(_)), "got: {err:?}");
    assert!(h.client.store().load().await.is_none(), "renewed pair discarded");
    assert!(!h.client.is_authenticated());
    assert_eq!(h.backend.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.revoke_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn timed_out_refresh_is_a_renewal_failure() {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let h = harness_with(http).await;
    h.client.login(credentials("correct horse")).await.unwrap();
    h.backend.expire_all();
    h.backend.refresh_delay_ms.store(1_000, Ordering::SeqCst);

    let err = h
        .client
        .gateway()
        .send(&ApiRequest::get(CLIENTS_PATH))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RenewalFailed(_)), "got: {err:?}");
    assert!(err.to_string().contains("timed out"), "got: {err}");
    assert!(h.client.store().load().await.is_none());
    assert!(!h.client.is_authenticated());
}

#[tokio::test]
async fn refresh_claims_requeries_backend() {
    let h = logged_in().await;

    let claims = h.client.refresh_claims().await.unwrap();

    assert!(claims.is_admin());
    assert!(h.client.has_role("User"));
}

#[tokio::test]
async fn live_session_is_restored_at_startup() {
    let h = harness().await;
    let path = h.dir.path().join("restored.json");
    let store = CredentialStore::open(path.clone()).await.unwrap();
    store
        .save(
            CredentialPair::new("at_saved", "rt_saved", now_millis() + 60_000),
            Some(Claims::new("ada@example.com", ["Admin"])),
        )
        .await
        .unwrap();
    drop(store);

    let client = SessionClient::with_http_client(reqwest::Client::new(), &h.base, path)
        .await
        .unwrap();

    assert!(client.is_authenticated());
    assert!(client.is_admin());
}

#[tokio::test]
async fn expired_session_is_cleared_at_startup() {
    let h = harness().await;
    let path = h.dir.path().join("expired.json");
    let store = CredentialStore::open(path.clone()).await.unwrap();
    store
        .save(CredentialPair::new("at_old", "rt_old", now_millis() - 1), None)
        .await
        .unwrap();
    drop(store);

    let client = SessionClient::with_http_client(reqwest::Client::new(), &h.base, path.clone())
        .await
        .unwrap();

    assert!(!client.is_authenticated());
    assert!(client.store().load().await.is_none());
    assert_eq!(tokio::fs::read_to_string(&path).await.unwrap().trim(), "{}");
}

#[tokio::test]
async fn transport_failure_passes_through_without_logout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let store = CredentialStore::open(path.clone()).await.unwrap();
    store
        .save(
            CredentialPair::new("at", "rt", now_millis() + 60_000),
            Some(Claims::new("ada@example.com", ["User"])),
        )
        .await
        .unwrap();
    drop(store);

    let client = SessionClient::with_http_client(reqwest::Client::new(), "http://127.0.0.1:1", path)
        .await
        .unwrap();
    let err = client
        .gateway()
        .send(&ApiRequest::get(CLIENTS_PATH))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    assert!(client.is_authenticated());
    assert!(client.store().load().await.is_some());
}
