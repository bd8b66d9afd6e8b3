use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    auth::require_admin_token,
    handlers::{create_secret, get_secret, health, reap_secrets},
    store::{crypto, Cipher, Store},
    vault::Vault,
    AppState,
};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared bearer token protecting the reap route ($EMBER_ADMIN_TOKEN).
    pub admin_token: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub sweep_interval: Duration,
    /// Base URL advertised in claim links ($EMBER_PUBLIC_URL).
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("EMBER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("EMBER_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            admin_token: std::env::var("EMBER_ADMIN_TOKEN").ok(),
            data_dir: std::env::var("EMBER_DATA_DIR").ok().map(PathBuf::from),
            sweep_interval: Duration::from_secs(
                std::env::var("EMBER_SWEEP_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            public_url: std::env::var("EMBER_PUBLIC_URL").ok(),
        }
    }
}

/// Read a master key from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve the master key from `EMBER_MASTER_KEY_FILE` (preferred) or
/// `EMBER_MASTER_KEY`. Absence or an empty value is fatal: the server
/// refuses to start rather than run with a key it invented. File-based
/// delivery is recommended for production; env vars are visible via
/// `docker inspect` and `/proc`.
pub fn resolve_master_key() -> Result<String> {
    if let Ok(path) = std::env::var("EMBER_MASTER_KEY_FILE") {
        let key = read_key_file(Path::new(&path))?;
        if std::env::var("EMBER_MASTER_KEY").is_ok() {
            tracing::warn!("both EMBER_MASTER_KEY and EMBER_MASTER_KEY_FILE are set; using file");
        }
        return Ok(key);
    }
    let raw = std::env::var("EMBER_MASTER_KEY")
        .context("EMBER_MASTER_KEY or EMBER_MASTER_KEY_FILE environment variable is required")?;
    master_key_from_env(raw)
}

/// Trim and validate an env-supplied master key. A variable that is set but
/// empty is rejected the same way an empty key file is.
fn master_key_from_env(raw: String) -> Result<String> {
    let key = raw.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("EMBER_MASTER_KEY is set but empty");
    }
    Ok(key)
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = crate::dirs::data_dir(cfg.data_dir.as_deref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    // Derive the record encryption key from the operator-supplied master key
    // and the per-installation salt. The derived key lives only inside the
    // cipher from here on.
    let master_key = resolve_master_key()?;
    let salt = load_or_create_salt(&data_dir)?;
    let key = crypto::derive_key(&master_key, &salt)?;
    let cipher = Cipher::new(&key);

    let db_path = data_dir.join("ember.db");
    let store = Store::open(&db_path).context("open store")?;
    let vault = Vault::new(store, cipher);

    vault.spawn_sweep(cfg.sweep_interval);

    // Claim links fall back to the bind address when no public URL is
    // configured; fine for local use, wrong behind a proxy.
    let public_url = cfg
        .public_url
        .unwrap_or_else(|| format!("http://{}:{}", cfg.host, cfg.port))
        .trim_end_matches('/')
        .to_string();

    let state = AppState {
        vault,
        admin_token: cfg.admin_token,
        public_url,
    };

    // Public routes: depositing and claiming need no credential beyond the
    // token itself.
    let public = Router::new()
        .route("/health", get(health))
        .route("/secrets", post(create_secret))
        .route("/secrets/{token}", get(get_secret));

    // Admin routes (bearer token required if configured).
    let protected = Router::new().route("/reap", post(reap_secrets)).layer(
        middleware::from_fn_with_state(state.clone(), require_admin_token),
    );

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "ember server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

/// Load the key derivation salt, generating and persisting one on first run.
/// The salt is not secret; it only makes the derived key unique per install.
fn load_or_create_salt(data_dir: &Path) -> Result<[u8; crypto::SALT_LEN]> {
    let salt_path = data_dir.join("ember.salt");
    if salt_path.exists() {
        let bytes = std::fs::read(&salt_path).context("read ember.salt")?;
        bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "ember.salt is corrupt (expected {} bytes, got {})",
                crypto::SALT_LEN,
                bytes.len()
            )
        })
    } else {
        let salt = crypto::generate_salt();
        std::fs::write(&salt_path, salt).context("write ember.salt")?;
        info!("generated new key derivation salt");
        Ok(salt)
    }
}
