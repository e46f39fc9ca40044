use axum::{Json, extract::State};
use garde::Validate;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::models::User;
use crate::services::settings::report_to_error;
use crate::state::AppState;

/// ログインリクエスト
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    /// ユーザーのメールアドレス
    #[garde(email)]
    pub email: String,
    /// ユーザーのパスワード
    #[garde(length(min = 1))]
    pub password: String,
    /// MFAコード（認証アプリまたはメール）
    #[garde(skip)]
    pub code: Option<String>,
    /// リカバリーコード
    #[garde(skip)]
    pub recovery_code: Option<String>,
}

/// ログインレスポンス
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// ベアラートークン（MFA不要または完了時のみ）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
    /// MFAが必要かどうか
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_mfa: Option<bool>,
    /// 利用可能なMFA方式（MFA必要時に返却）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<Vec<&'static str>>,
}

/// ログインハンドラー
///
/// POST /api/login
///
/// 処理フロー:
/// 1. リクエストバリデーション
/// 2. ユーザー認証（DB照合、試行回数制限）
/// 3. MFA有効チェック（有効でコードなしなら requires_mfa: true を返却）
/// 4. MFAコード / リカバリーコード検証
/// 5. セッション発行
pub async fn login(
    State(state): State<AppState>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // 1. リクエストバリデーション
    request.validate().map_err(report_to_error)?;

    // 2. ユーザー認証
    let user = state
        .auth_service
        .authenticate(&request.email, &request.password)
        .await?;

    // 3. MFA有効チェック
    let providers = mfa_providers(&state, &user);
    if !providers.is_empty() {
        let passed = match (&request.code, &request.recovery_code) {
            (_, Some(recovery_code)) => verify_recovery_code(&state, &user, recovery_code).await?,
            (Some(code), None) => verify_mfa_code(&state, &user, code).await?,
            (None, None) => {
                if providers.contains(&"email") {
                    send_login_code(&state, &user).await?;
                }
                return Ok(Json(LoginResponse {
                    token: None,
                    expires_at: None,
                    requires_mfa: Some(true),
                    providers: Some(providers),
                }));
            }
        };

        // 4. コード不一致
        if !passed {
            state.auth_service.record_failure(&request.email).await;
            tracing::warn!(user_id = %user.id, "ログイン: MFAコード不一致");
            return Err(AppError::invalid_code());
        }
    }

    // 5. セッション発行
    state.auth_service.clear_failures(&request.email).await;
    let issued = state.auth_service.issue_session(&user).await?;

    Ok(Json(LoginResponse {
        token: Some(issued.token),
        expires_at: OffsetDateTime::from_unix_timestamp(issued.session.expires_at).ok(),
        requires_mfa: None,
        providers: None,
    }))
}

/// ユーザーが有効化している、かつ登録済みのMFA方式
fn mfa_providers(state: &AppState, user: &User) -> Vec<&'static str> {
    let mut providers = Vec::new();
    if state.app_mfa.is_some() && user.has_app_authentication() {
        providers.push("app");
    }
    if state.email_mfa.is_some() && user.has_email_authentication {
        providers.push("email");
    }
    providers
}

/// 認証アプリ → メールの順にコードを検証
async fn verify_mfa_code(state: &AppState, user: &User, code: &str) -> Result<bool, AppError> {
    let code = code.trim();

    if let Some(app_mfa) = &state.app_mfa
        && user.has_app_authentication()
        && app_mfa.provider().verify_user_code(user, code)?
    {
        return Ok(true);
    }

    if let Some(email_mfa) = &state.email_mfa
        && user.has_email_authentication
    {
        return email_mfa.provider().verify_code(user.id, code).await;
    }

    Ok(false)
}

/// リカバリーコードを消費
async fn verify_recovery_code(
    state: &AppState,
    user: &User,
    recovery_code: &str,
) -> Result<bool, AppError> {
    match &state.app_mfa {
        Some(app_mfa) if app_mfa.provider().is_recoverable() => {
            app_mfa
                .provider()
                .consume_recovery_code(&state.user_repo, user, recovery_code)
                .await
        }
        _ => Ok(false),
    }
}

/// ログイン用のメールコードを送信（送信間隔制限中は既存のコードを使う）
async fn send_login_code(state: &AppState, user: &User) -> Result<(), AppError> {
    if let Some(email_mfa) = &state.email_mfa
        && !email_mfa.provider().send_code(user).await?
    {
        tracing::debug!(user_id = %user.id, "ログイン: 既存のメールコードを利用");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            code: None,
            recovery_code: None,
        }
    }

    #[test]
    fn test_validate_empty_email() {
        assert!(request("", "password123").validate().is_err());
    }

    #[test]
    fn test_validate_invalid_email() {
        assert!(request("invalid-email", "password123").validate().is_err());
    }

    #[test]
    fn test_validate_empty_password() {
        assert!(request("test@example.com", "").validate().is_err());
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(request("test@example.com", "password123").validate().is_ok());
    }
}
