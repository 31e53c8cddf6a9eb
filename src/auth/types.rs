// Session and token-endpoint wire types

use serde::{Deserialize, Serialize};

/// Access/refresh token pair held for an authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Tokens produced by a successful refresh
/// The backend rotates refresh tokens, so a new one may be included
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access: String,
    pub refresh: Option<String>,
}

/// Token refresh request body
#[derive(Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/// Token refresh response body
#[derive(Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Login (token obtain) request body
#[derive(Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response body
#[derive(Deserialize)]
pub struct TokenPairResponse {
    pub access: String,
    pub refresh: String,
}
