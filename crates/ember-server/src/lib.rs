pub mod auth;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod server;
pub mod store;
pub mod vault;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: vault::Vault,
    /// Optional bearer token for write-protecting administrative routes.
    pub admin_token: Option<String>,
    /// Externally reachable base URL used when building claim links.
    pub public_url: String,
}

pub use error::{CipherError, StoreError, VaultError};
pub use server::{read_key_file, run, ServerConfig};
pub use vault::Vault;
