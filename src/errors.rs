use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{error::DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Additional detail, only populated for client-caused errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Failure taxonomy of the movement ledger engine.
///
/// Transient kinds ([`LedgerError::is_transient`]) are retried inside the
/// orchestrator with linear backoff; everything else propagates to the caller
/// on first occurrence.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database unreachable: {0}")]
    Connectivity(#[source] DbErr),

    #[error("header insert could not satisfy the schema after {attempts} attempts (last missing column: {last_column:?})")]
    SchemaAdaptationExhausted {
        attempts: u32,
        last_column: Option<String>,
    },

    #[error("identifier collision on {table} id {id}")]
    IdentifierCollision { table: &'static str, id: i64 },

    #[error("lock or timeout conflict: {0}")]
    LockConflict(String),

    #[error("no stock balance row for company {company}, product {product}")]
    BalanceNotFound { company: i64, product: i64 },

    #[error("batch aborted by conflicting movement id: {0}")]
    BatchConflict(String),

    #[error("adjustment would drive stock negative: balance {balance} with delta {delta}")]
    NegativeStockRejected { balance: Decimal, delta: Decimal },

    #[error("deadline exceeded after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("adjustment failed: {0}")]
    Adjustment(String),
}

impl LedgerError {
    /// Kinds the orchestrator retries with backoff before giving up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::IdentifierCollision { .. } | Self::LockConflict(_) | Self::BatchConflict(_)
        )
    }
}

/// Lock/timeout/deadlock signatures seen across the backends this engine
/// has run against. Matched against the uppercased driver message.
const LOCK_SIGNATURES: &[&str] = &["DEADLOCK", "LOCK", "TIMEOUT", "CONFLICT"];

/// Uniqueness-violation signatures for drivers whose errors are not
/// structured (`-803` is the Firebird duplicate-key SQLCODE the legacy
/// schema was born on).
const UNIQUE_SIGNATURES: &[&str] = &["UNIQUE", "DUPLICAT", "-803"];

/// True when the error is a primary-key/unique-index rejection.
pub fn is_unique_violation(err: &DbErr) -> bool {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    let msg = err.to_string().to_uppercase();
    UNIQUE_SIGNATURES.iter().any(|sig| msg.contains(sig))
}

/// True when the error looks like a transient lock/timeout/deadlock conflict.
pub fn is_lock_conflict(err: &DbErr) -> bool {
    let msg = err.to_string().to_uppercase();
    !is_unique_violation(err) && LOCK_SIGNATURES.iter().any(|sig| msg.contains(sig))
}

/// HTTP-facing error for the axum layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl ApiError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Ledger(err) => match err {
                LedgerError::BalanceNotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::NegativeStockRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::IdentifierCollision { .. }
                | LedgerError::LockConflict(_)
                | LedgerError::BatchConflict(_) => StatusCode::CONFLICT,
                LedgerError::Cancelled { .. } => StatusCode::REQUEST_TIMEOUT,
                LedgerError::Connectivity(_)
                | LedgerError::SchemaAdaptationExhausted { .. }
                | LedgerError::Adjustment(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Message suitable for the HTTP response. Server-side failures come back
    /// generic; the full detail stays in the logs.
    pub fn response_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Ledger(err) if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR => {
                match err {
                    LedgerError::SchemaAdaptationExhausted { .. } => {
                        "Adjustment failed: could not satisfy inventory schema".to_string()
                    }
                    _ => "Adjustment failed".to_string(),
                }
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Unknown").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
