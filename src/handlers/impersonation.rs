use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::CurrentUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ImpersonationResponse {
    pub redirect_to: &'static str,
}

/// POST /impersonate/take/{user_id}
///
/// 同じセッションのまま対象ユーザーとして振る舞う
pub async fn take(
    State(state): State<AppState>,
    current: CurrentUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ImpersonationResponse>, AppError> {
    let redirect_to = state
        .impersonation_service
        .take(&current.session, &current.user, user_id)
        .await?;

    Ok(Json(ImpersonationResponse { redirect_to }))
}

/// POST /impersonate/leave
pub async fn leave(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<ImpersonationResponse>, AppError> {
    let redirect_to = state
        .impersonation_service
        .leave(&current.session)
        .await?;

    Ok(Json(ImpersonationResponse { redirect_to }))
}
