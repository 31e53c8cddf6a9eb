//! Mock Cotidomo API server for integration tests.
//!
//! Serves bearer-protected routes plus a gateable token refresh endpoint, and
//! records what the client actually sent: refresh call count, refresh body, and
//! the order in which authorized replays arrived.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};

pub struct MockApiState {
    /// Token the protected routes accept (returned by a successful refresh)
    pub accept_token: String,

    /// Rotated refresh token included in a successful refresh response
    pub rotated_refresh: String,

    /// When true, the refresh endpoint rejects with 401
    pub refresh_fails: bool,

    /// When set, the refresh endpoint waits on this before responding
    pub refresh_gate: Option<Arc<Notify>>,

    /// Number of refresh calls received
    pub refresh_calls: AtomicUsize,

    /// Paths of authorized requests, in arrival order
    pub hits: Mutex<Vec<String>>,

    /// Body of the most recent refresh call
    pub last_refresh_body: Mutex<Option<Value>>,
}

impl MockApiState {
    pub fn new() -> Self {
        Self {
            accept_token: "fresh-access-token".to_string(),
            rotated_refresh: "rotated-refresh-token".to_string(),
            refresh_fails: false,
            refresh_gate: None,
            refresh_calls: AtomicUsize::new(0),
            hits: Mutex::new(Vec::new()),
            last_refresh_body: Mutex::new(None),
        }
    }
}

pub struct MockApi {
    pub url: String,
    pub state: Arc<MockApiState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockApi {
    /// Start the mock server on an ephemeral port
    pub async fn start(state: MockApiState) -> Self {
        let state = Arc::new(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let app = Router::new()
            .route("/token/refresh/", post(handle_refresh))
            .route("/locked/", get(handle_locked))
            .fallback(handle_protected)
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            url: format!("http://127.0.0.1:{}/", port),
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Any route not registered explicitly acts as a bearer-protected resource
async fn handle_protected(
    State(state): State<Arc<MockApiState>>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let expected = format!("Bearer {}", state.accept_token);
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if authorized {
        state.hits.lock().unwrap().push(uri.path().to_string());
        Json(json!({"ok": true})).into_response()
    } else {
        unauthorized()
    }
}

/// Rejects every token, including freshly refreshed ones
async fn handle_locked() -> Response {
    unauthorized()
}

async fn handle_refresh(
    State(state): State<Arc<MockApiState>>,
    Json(body): Json<Value>,
) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    *state.last_refresh_body.lock().unwrap() = Some(body);

    if let Some(ref gate) = state.refresh_gate {
        gate.notified().await;
    }

    if state.refresh_fails {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Token is invalid or expired", "code": "token_not_valid"})),
        )
            .into_response();
    }

    Json(json!({"access": state.accept_token, "refresh": state.rotated_refresh})).into_response()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"detail": "Given token not valid for any token type", "code": "token_not_valid"})),
    )
        .into_response()
}
