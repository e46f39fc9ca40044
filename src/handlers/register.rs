use axum::{Json, extract::State, http::StatusCode};
use garde::Validate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::models::Role;
use crate::services::auth::Registration;
use crate::services::settings::report_to_error;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[garde(length(chars, min = 1, max = 255))]
    pub name: String,
    #[garde(email, length(max = 255))]
    pub email: String,
    /// 強度はセキュリティ設定で検証
    #[garde(length(min = 1))]
    pub password: String, // SecretBox不要（Deserialize後すぐハッシュ化）
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    pub roles: Vec<Role>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// ユーザー登録ハンドラー
///
/// POST /api/register
///
/// # Security
/// - パスワードはログに出力しない
/// - パスワードは即座にハッシュ化
pub async fn register(
    State(state): State<AppState>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    request.validate().map_err(report_to_error)?;

    let user = state
        .auth_service
        .register(Registration {
            name: request.name.trim(),
            email: request.email.trim(),
            password: &request.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: user.id,
            email_verified: user.has_verified_email(),
            name: user.name,
            email: user.email,
            roles: user.roles,
            created_at: user.created_at,
        }),
    ))
}
