use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{error::VaultError, AppState};

/// Longest accepted secret, in bytes.
pub const MAX_SECRET_BYTES: usize = 64 * 1024;

/// TTL applied when a deposit does not name one.
pub const DEFAULT_EXPIRE_MINUTES: u64 = 10;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Deposit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub secret: String,
    pub expire_minutes: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub token: String,
    pub url: String,
    pub expire_minutes: u64,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Response {
    if body.secret.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "secret must not be empty"})),
        )
            .into_response();
    }
    if body.secret.len() > MAX_SECRET_BYTES {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "secret exceeds 64 KiB limit"})),
        )
            .into_response();
    }

    let expire_minutes = body.expire_minutes.unwrap_or(DEFAULT_EXPIRE_MINUTES);

    match state.vault.deposit(body.secret.as_bytes(), expire_minutes) {
        Ok(token) => {
            let url = format!("{}/secrets/{}", state.public_url, token);
            (
                StatusCode::CREATED,
                Json(CreateResponse {
                    token,
                    url,
                    expire_minutes,
                }),
            )
                .into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Claim ─────────────────────────────────────────────────────────────────────

pub async fn get_secret(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    match state.vault.consume(&token) {
        Ok(Some(plaintext)) => match String::from_utf8(plaintext) {
            Ok(secret) => Json(json!({"secret": secret})).into_response(),
            // Stored bytes that are not UTF-8 read the same as no record.
            Err(_) => not_found(),
        },
        Ok(None) => not_found(),
        Err(e) => internal_error(e),
    }
}

// ── Reap ──────────────────────────────────────────────────────────────────────

pub async fn reap_secrets(State(state): State<AppState>) -> Response {
    match state.vault.reap_expired() {
        Ok(reaped) => {
            info!(reaped, "manual reap");
            Json(json!({"reaped": reaped})).into_response()
        }
        Err(e) => internal_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// The uniform miss response: never distinguishes absent, consumed, expired
/// or undecryptable.
fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response()
}

fn internal_error(e: VaultError) -> Response {
    tracing::error!(error = %e, "internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}
