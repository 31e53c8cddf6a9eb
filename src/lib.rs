// Cotidomo API client
// Authenticated HTTP client with transparent token refresh

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;

pub use config::Config;
pub use error::{ApiError, Result};
pub use http_client::{ApiClient, LogoutHook, RequestBuilder};
