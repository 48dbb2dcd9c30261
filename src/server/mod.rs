//! Read-only HTTP API over the outcome store.
//!
//! - `GET /postal_codes` - every resolved code
//! - `GET /postal_codes/:code` - one resolved code (any accepted spelling)
//! - `POST /verify_postal_code` - `{"postal_code": ...}` in, `{"message": ...}` out
//!
//! Nothing here writes to the database.

use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::{self, PostalCodeRecord};
use crate::enrichment::normalize;

/// Default listen address for `serve`.
pub const DEFAULT_ADDR: &str = "127.0.0.1:5000";

/// Body returned by `verify_postal_code` and every failing route
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn message(status: StatusCode, text: &str) -> Response {
    (
        status,
        Json(MessageResponse {
            message: text.to_string(),
        }),
    )
        .into_response()
}

/// Build the router. State is the pool the enrichment engine writes to.
pub fn router(pool: SqlitePool) -> Router {
    Router::new()
        .route("/postal_codes", get(list_postal_codes))
        .route("/postal_codes/:code", get(get_postal_code))
        .route("/verify_postal_code", post(verify_postal_code))
        .with_state(pool)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(pool: SqlitePool, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Serving postal codes");

    axum::serve(listener, router(pool))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down read API");
        })
        .await
}

async fn list_postal_codes(State(pool): State<SqlitePool>) -> Response {
    match db::get_all_postal_codes(&pool).await {
        Ok(rows) if rows.is_empty() => message(StatusCode::NOT_FOUND, "No postal codes found."),
        Ok(rows) => Json::<Vec<PostalCodeRecord>>(rows).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list postal codes");
            message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error retrieving postal codes.",
            )
        }
    }
}

async fn get_postal_code(State(pool): State<SqlitePool>, Path(raw): Path<String>) -> Response {
    let Ok(code) = normalize(&raw) else {
        return message(StatusCode::NOT_FOUND, "Postal code not found.");
    };

    match db::get_postal_code(&pool, code.as_str()).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => message(StatusCode::NOT_FOUND, "Postal code not found."),
        Err(e) => {
            tracing::error!(code = %code, error = %e, "Failed to fetch postal code");
            message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error retrieving postal codes.",
            )
        }
    }
}

/// Single-code check from the verification form
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub postal_code: String,
}

async fn verify_postal_code(
    State(pool): State<SqlitePool>,
    Json(request): Json<VerifyRequest>,
) -> Response {
    let code = match normalize(&request.postal_code) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(token = %request.postal_code, error = %e, "Rejected malformed postal code");
            return message(StatusCode::BAD_REQUEST, "Invalid postal code format.");
        }
    };

    match db::get_postal_code(&pool, code.as_str()).await {
        Ok(Some(record)) => message(
            StatusCode::OK,
            &format!(
                "{}: {}, {}",
                record.codigo_postal, record.concelho, record.distrito
            ),
        ),
        Ok(None) => message(StatusCode::NOT_FOUND, "Postal code not found."),
        Err(e) => {
            tracing::error!(code = %code, error = %e, "Failed to verify postal code");
            message(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error retrieving postal codes.",
            )
        }
    }
}
