use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use crate::auth::{self, CredentialStore};
use crate::config::Config;
use crate::error::ApiError;

/// Hook invoked when the session terminates (refresh failure or 401 after retry)
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// A request that hit a 401 while a refresh was already in flight, waiting to be
/// replayed with the new token
struct PendingRequest {
    request: Request,
    done: oneshot::Sender<Result<Response, ApiError>>,
}

/// Refresh coordination state: the in-progress flag and the FIFO wait queue
#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
}

/// Authenticated HTTP client for the Cotidomo API
///
/// Owns the `Authorization` header: the stored access token is attached to every
/// outgoing request, and a 401 is recovered once by refreshing the token. Requests
/// that fail with 401 while a refresh is in flight queue up and are replayed in
/// FIFO order with the new token; the request that triggered the refresh replays
/// last. A failed refresh rejects every queued caller, clears the stored
/// credentials, and fires the logout hook.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: Url,
    token_obtain_path: String,
    token_refresh_path: String,

    /// Durable session credentials
    store: Arc<dyn CredentialStore>,

    /// At most one refresh call is ever in flight; all 401s arriving while one is
    /// outstanding enqueue here instead of triggering a second refresh
    refresh: Mutex<RefreshState>,

    on_logout: Option<LogoutHook>,
}

impl ApiClient {
    /// Create a new client
    pub fn new(config: &Config, store: Arc<dyn CredentialStore>) -> Result<Self, ApiError> {
        Self::with_logout_hook(config, store, None)
    }

    /// Create a new client with a logout hook
    ///
    /// The hook is the process-wide logout side effect: it runs after the stored
    /// credentials have been cleared, exactly once per failed refresh, and the host
    /// application is expected to tear down session state and navigate to login.
    pub fn with_logout_hook(
        config: &Config,
        store: Arc<dyn CredentialStore>,
        on_logout: Option<LogoutHook>,
    ) -> Result<Self, ApiError> {
        let base_url = parse_base_url(&config.base_url)?;

        let client = Client::builder()
            .pool_max_idle_per_host(config.http_max_connections)
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token_obtain_path: config.token_obtain_path.clone(),
            token_refresh_path: config.token_refresh_path.clone(),
            store,
            refresh: Mutex::new(RefreshState::default()),
            on_logout,
        })
    }

    /// Start a request with an arbitrary method
    ///
    /// `path` is resolved against the configured base URL; absolute http(s) URLs
    /// are accepted as-is.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder<'_> {
        let inner = self
            .resolve_url(path)
            .map(|url| self.client.request(method, url));
        RequestBuilder {
            client: self,
            inner,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    /// Log in with username/password and store the obtained token pair
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let pair = auth::obtain_token_pair(
            &self.client,
            &self.base_url,
            &self.token_obtain_path,
            username,
            password,
        )
        .await
        .map_err(|e| ApiError::AuthError(format!("{:#}", e)))?;

        self.store.set_tokens(&pair.access, &pair.refresh)?;
        tracing::info!(username = %username, "Logged in");
        Ok(())
    }

    /// Process-wide logout: clear stored credentials and fire the logout hook
    pub fn logout(&self) {
        tracing::warn!("Session terminated, clearing stored credentials");
        if let Err(e) = self.store.clear() {
            tracing::error!("Failed to clear stored credentials: {:#}", e);
        }
        if let Some(ref hook) = self.on_logout {
            hook();
        }
    }

    fn resolve_url(&self, path: &str) -> Result<Url, ApiError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|e| ApiError::ValidationError(format!("Invalid URL '{}': {}", path, e)));
        }
        // A leading slash must not escape the base's path prefix
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::ValidationError(format!("Invalid request path '{}': {}", path, e)))
    }

    /// Execute a request with bearer authentication and one-shot 401 recovery
    async fn execute_with_auth(&self, request: Request) -> Result<Response, ApiError> {
        if request.headers().contains_key(AUTHORIZATION) {
            return Err(ApiError::ValidationError(
                "The Authorization header is managed by the client and must not be set by the caller"
                    .to_string(),
            ));
        }

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let response = self.send_bearing_token(&request).await?;
        let status = response.status();
        tracing::debug!(status = %status, "Received HTTP response");

        if status != StatusCode::UNAUTHORIZED {
            return into_result(response).await;
        }

        tracing::warn!(method = %method, url = %url, "Request rejected with 401, recovering");
        self.recover_unauthorized(request).await
    }

    /// Clone the request, attach the currently stored access token, and send it
    async fn send_bearing_token(&self, request: &Request) -> Result<Response, ApiError> {
        let mut attempt = clone_request(request)?;
        if let Some(token) = self.store.access_token()? {
            attempt
                .headers_mut()
                .insert(AUTHORIZATION, bearer_header(&token)?);
        }
        Ok(self.client.execute(attempt).await?)
    }

    /// First 401 on a request: join the in-flight refresh, or run one
    async fn recover_unauthorized(&self, request: Request) -> Result<Response, ApiError> {
        let waiter = {
            let mut state = self.refresh.lock().await;
            if state.refreshing {
                let (done, rx) = oneshot::channel();
                state.queue.push_back(PendingRequest { request, done });
                Ok(rx)
            } else {
                state.refreshing = true;
                Err(request)
            }
        };

        match waiter {
            Ok(rx) => {
                tracing::debug!("Refresh already in flight, request queued");
                rx.await
                    .map_err(|_| ApiError::AuthError("Token refresh was abandoned".to_string()))?
            }
            Err(request) => self.refresh_and_drain(request).await,
        }
    }

    /// Perform the single refresh call, drain the wait queue in FIFO order, then
    /// replay the request that triggered the refresh
    async fn refresh_and_drain(&self, original: Request) -> Result<Response, ApiError> {
        match self.run_refresh().await {
            Ok(()) => {
                self.drain_queue().await;
                self.replay(original).await
            }
            Err(err) => {
                self.reject_queue(&err).await;
                self.logout();
                Err(err)
            }
        }
    }

    /// Call the refresh endpoint once and persist the new token(s)
    async fn run_refresh(&self) -> Result<(), ApiError> {
        let refresh_token = self
            .store
            .refresh_token()?
            .ok_or_else(|| ApiError::AuthError("No refresh token stored".to_string()))?;

        let tokens = auth::refresh_access_token(
            &self.client,
            &self.base_url,
            &self.token_refresh_path,
            &refresh_token,
        )
        .await
        .map_err(|e| ApiError::AuthError(format!("{:#}", e)))?;

        match tokens.refresh {
            Some(ref rotated) => self.store.set_tokens(&tokens.access, rotated)?,
            None => self.store.set_access_token(&tokens.access)?,
        }
        Ok(())
    }

    /// Replay queued requests in FIFO order, routing each result into its handle.
    /// The flag clears under the same lock that observes the empty queue, so a
    /// late 401 cannot enqueue with nobody left to replay it.
    async fn drain_queue(&self) {
        loop {
            let pending = {
                let mut state = self.refresh.lock().await;
                match state.queue.pop_front() {
                    Some(pending) => Some(pending),
                    None => {
                        state.refreshing = false;
                        None
                    }
                }
            };
            let Some(pending) = pending else { break };
            let result = self.replay(pending.request).await;
            let _ = pending.done.send(result);
        }
    }

    /// Reject every queued caller with the refresh error
    async fn reject_queue(&self, err: &ApiError) {
        let waiters = {
            let mut state = self.refresh.lock().await;
            state.refreshing = false;
            std::mem::take(&mut state.queue)
        };

        if !waiters.is_empty() {
            tracing::warn!(
                count = waiters.len(),
                "Rejecting queued requests after failed refresh"
            );
        }

        let message = match err {
            ApiError::AuthError(msg) => msg.clone(),
            other => other.to_string(),
        };
        for pending in waiters {
            let _ = pending.done.send(Err(ApiError::AuthError(message.clone())));
        }
    }

    /// Re-issue a request with the freshly stored token. This path never triggers
    /// another refresh: a second 401 is a terminal authentication failure.
    async fn replay(&self, request: Request) -> Result<Response, ApiError> {
        let response = self.send_bearing_token(&request).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            self.logout();
            return Err(ApiError::AuthError(format!(
                "Request rejected with 401 after a token refresh: {}",
                message
            )));
        }
        into_result(response).await
    }
}

/// Builder for a single authenticated request
pub struct RequestBuilder<'a> {
    client: &'a ApiClient,
    inner: Result<reqwest::RequestBuilder, ApiError>,
}

impl<'a> RequestBuilder<'a> {
    pub fn header(self, key: &str, value: &str) -> Self {
        Self {
            client: self.client,
            inner: self.inner.map(|b| b.header(key, value)),
        }
    }

    pub fn query<T: Serialize + ?Sized>(self, query: &T) -> Self {
        Self {
            client: self.client,
            inner: self.inner.map(|b| b.query(query)),
        }
    }

    pub fn json<T: Serialize + ?Sized>(self, body: &T) -> Self {
        Self {
            client: self.client,
            inner: self.inner.map(|b| b.json(body)),
        }
    }

    /// Send the request through the 401-recovery pipeline
    pub async fn send(self) -> Result<Response, ApiError> {
        let request = self.inner?.build()?;
        self.client.execute_with_auth(request).await
    }
}

/// Map a response to the caller-facing result: 2xx passes through, anything else
/// becomes a backend error carrying the server payload
async fn into_result(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    tracing::warn!(status = status.as_u16(), message = %message, "API request failed");
    Err(ApiError::BackendError {
        status: status.as_u16(),
        message,
    })
}

fn parse_base_url(raw: &str) -> Result<Url, ApiError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{}/", raw)
    };
    Url::parse(&normalized)
        .map_err(|e| ApiError::ConfigError(format!("Invalid base URL '{}': {}", raw, e)))
}

fn clone_request(request: &Request) -> Result<Request, ApiError> {
    request
        .try_clone()
        .ok_or_else(|| ApiError::ValidationError("Request body is not cloneable".to_string()))
}

fn bearer_header(token: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ApiError::AuthError("Stored access token is not a valid header value".to_string()))
}
