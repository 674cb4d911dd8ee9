//! Legacy user directory endpoints: active-user listing and the
//! credential check used by handheld clients.

use axum::{
    extract::{Json, State},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::{ApiError, ErrorResponse};
use crate::handlers::AppState;
use crate::services::directory::{AuthenticatedUser, CredentialOutcome, UserSummary};

pub fn users_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_users))
        .route("/auth", post(authenticate))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthRequest {
    /// Username or numeric user id
    #[validate(length(min = 1, max = 100))]
    pub login: String,
    #[validate(length(min = 1, max = 200))]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub ok: bool,
    pub id: i64,
    pub username: String,
    pub name: String,
}

impl From<AuthenticatedUser> for AuthResponse {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            ok: true,
            id: user.id,
            username: user.username,
            name: user.name,
        }
    }
}

/// Active users from the legacy directory.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "Active users", body = [UserSummary]),
    ),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let users = state.directory.list_active_users().await?;
    Ok(Json(users))
}

/// Verify credentials against the legacy user table. All rejection reasons
/// collapse to 401; the specific reason is only logged.
#[utoipa::path(
    post,
    path = "/api/v1/users/auth",
    request_body = AuthRequest,
    responses(
        (status = 200, description = "Credentials accepted", body = AuthResponse),
        (status = 401, description = "Credentials rejected", body = ErrorResponse),
    ),
    tag = "users"
)]
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.validate()?;

    match state
        .directory
        .verify_credentials(&payload.login, &payload.password)
        .await?
    {
        CredentialOutcome::Accepted(user) => Ok(Json(user.into())),
        outcome => {
            debug!(login = %payload.login, ?outcome, "authentication rejected");
            Err(ApiError::Unauthorized("invalid credentials".into()))
        }
    }
}
