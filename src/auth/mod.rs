// Authentication module
// Credential storage and token endpoint calls

mod refresh;
mod store;
mod types;

pub use refresh::{obtain_token_pair, refresh_access_token};
pub use store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use types::{RefreshedTokens, TokenPair};
