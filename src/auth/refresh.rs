// Token endpoint calls
// Refresh failures are never retried here; the caller decides what cascades

use anyhow::{Context, Result};
use reqwest::{Client, Url};

use super::types::{
    LoginRequest, RefreshRequest, RefreshResponse, RefreshedTokens, TokenPair, TokenPairResponse,
};

/// Exchange the stored refresh token for a new access token
///
/// `POST <base><refresh_path>` with `{"refresh": ...}`; expects `{"access": ...}`
/// and, when the backend rotates refresh tokens, a new `"refresh"` entry.
pub async fn refresh_access_token(
    client: &Client,
    base_url: &Url,
    refresh_path: &str,
    refresh_token: &str,
) -> Result<RefreshedTokens> {
    tracing::debug!("Refreshing access token...");

    let url = join_path(base_url, refresh_path)?;
    let request = RefreshRequest {
        refresh: refresh_token.to_string(),
    };

    let response = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to send token refresh request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Token refresh failed: {} - {}", status, error_text);
    }

    let data: RefreshResponse = response
        .json()
        .await
        .context("Failed to parse token refresh response")?;

    if data.access.is_empty() {
        anyhow::bail!("Token refresh response does not contain an access token");
    }

    tracing::info!("Access token refreshed");

    Ok(RefreshedTokens {
        access: data.access,
        refresh: data.refresh,
    })
}

/// Obtain a fresh token pair from username/password credentials
pub async fn obtain_token_pair(
    client: &Client,
    base_url: &Url,
    obtain_path: &str,
    username: &str,
    password: &str,
) -> Result<TokenPair> {
    tracing::debug!(username = %username, "Obtaining token pair...");

    let url = join_path(base_url, obtain_path)?;
    let request = LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    };

    let response = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to send login request")?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("Login failed: {} - {}", status, error_text);
    }

    let data: TokenPairResponse = response
        .json()
        .await
        .context("Failed to parse login response")?;

    if data.access.is_empty() || data.refresh.is_empty() {
        anyhow::bail!("Login response does not contain a full token pair");
    }

    Ok(TokenPair {
        access: data.access,
        refresh: data.refresh,
    })
}

/// Resolve a token-endpoint path against the configured base URL
/// Leading slashes are trimmed so the base's own path prefix is kept
fn join_path(base_url: &Url, path: &str) -> Result<Url> {
    base_url
        .join(path.trim_start_matches('/'))
        .with_context(|| format!("Invalid token endpoint path: {}", path))
}
