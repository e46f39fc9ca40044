use axum::{Json, extract::State};
use serde::Serialize;

use crate::error::AppError;
use crate::extract::CurrentUser;
use crate::state::AppState;

/// ログアウトレスポンス
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// ログアウトハンドラー
///
/// POST /api/logout
///
/// 提示されたセッションのみ破棄する（なりすまし中は元の管理者のセッションごと破棄）
pub async fn logout(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<LogoutResponse>, AppError> {
    state.auth_service.revoke(&current.session).await?;

    Ok(Json(LogoutResponse { logged_out: true }))
}
