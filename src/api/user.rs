use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;
use utoipa::ToSchema;

use super::{ApiJson, ApiResult, SESSION_USER_KEY, SessionUser, current_user, ok};
use crate::{
    account::{self, AccountInfo},
    server::AppState,
};

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/user/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AccountInfo),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<AccountInfo> {
    let LoginRequest { email, password } = req;
    let account = account::login(&state.database, email, password).await?;
    session
        .cycle_id()
        .await
        .map_err(|e| anyhow::anyhow!("failed to cycle session id: {}", e))?;
    session
        .insert(
            SESSION_USER_KEY,
            SessionUser {
                id: account.id,
                role: account.role,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to store session: {}", e))?;
    info!("{} {} logged in", account.role, account.id);
    ok(account)
}

#[utoipa::path(
    post,
    path = "/api/user/logout",
    responses(
        (status = 200, description = "Logout successful")
    )
)]
pub async fn logout(session: Session) -> ApiResult<&'static str> {
    session
        .flush()
        .await
        .map_err(|e| anyhow::anyhow!("failed to flush session: {}", e))?;
    ok("Logout successful")
}

#[utoipa::path(
    get,
    path = "/api/user/me",
    responses(
        (status = 200, description = "The logged in account", body = AccountInfo),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn me(State(state): State<AppState>, session: Session) -> ApiResult<AccountInfo> {
    let user = current_user(&session).await?;
    ok(account::get_account(&state.database, user.id).await?)
}

pub fn get_user_scope() -> Router<AppState> {
    Router::new().nest(
        "/user",
        Router::new()
            .route("/login", post(login))
            .route("/logout", post(logout))
            .route("/me", get(me)),
    )
}
