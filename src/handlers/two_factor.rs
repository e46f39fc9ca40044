use axum::{Json, extract::State, http::StatusCode};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extract::{AppJson, CurrentUser};
use crate::models::{ApplicationFeaturesSettings, Capability};
use crate::services::app_mfa::AppSetup;
use crate::services::settings::report_to_error;
use crate::state::AppState;

// === Security page state ===

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStateResponse {
    pub must_verify_email: bool,
    pub email_verified: bool,
    pub filament_mfa: MfaState,
}

#[derive(Debug, Serialize)]
pub struct MfaState {
    pub providers: ProviderFlags,
    pub state: ProviderFlags,
    pub options: MfaOptions,
}

#[derive(Debug, Serialize)]
pub struct ProviderFlags {
    pub app: bool,
    pub email: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaOptions {
    pub app_recovery_codes: bool,
}

/// GET /settings/security
///
/// 登録済みプロバイダーとユーザーの有効化状況
pub async fn security_state(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Json<SecurityStateResponse> {
    let user = &current.user;

    Json(SecurityStateResponse {
        must_verify_email: user.has_capability(Capability::MustVerifyEmail),
        email_verified: user.has_verified_email(),
        filament_mfa: MfaState {
            providers: ProviderFlags {
                app: state.app_mfa.is_some(),
                email: state.email_mfa.is_some(),
            },
            state: ProviderFlags {
                app: user.has_app_authentication(),
                email: user.has_email_authentication,
            },
            options: MfaOptions {
                app_recovery_codes: state
                    .app_mfa
                    .as_ref()
                    .is_some_and(|app_mfa| app_mfa.provider().is_recoverable()),
            },
        },
    })
}

// === App authentication ===

/// POST /settings/security/mfa/app/setup
///
/// シークレットとリカバリーコードを生成し、暗号化エンベロープと共に返す
///
/// # Security
/// - シークレット平文はログ出力禁止
/// - この時点ではユーザーに何も保存しない
pub async fn setup_app_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<AppSetup>, AppError> {
    let app_mfa = state.app_mfa()?;
    ensure_two_factor_enabled(&state).await?;

    Ok(Json(app_mfa.setup(&current.user)?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnableAppRequest {
    #[garde(length(min = 1))]
    pub encrypted: String,
    #[garde(length(min = 1))]
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCodesResponse {
    pub recovery_codes: Option<Vec<String>>,
}

/// POST /settings/security/mfa/app/enable
///
/// # Security
/// - コードはログ出力禁止
pub async fn enable_app_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
    AppJson(request): AppJson<EnableAppRequest>,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    let app_mfa = state.app_mfa()?;
    request.validate().map_err(report_to_error)?;

    let recovery_codes = app_mfa
        .enable(&current.user, &request.encrypted, &request.code)
        .await?;

    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

/// DELETE /settings/security/mfa/app
pub async fn disable_app_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<StatusCode, AppError> {
    state.app_mfa()?.disable(&current.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /settings/security/mfa/app/recovery-codes
pub async fn regenerate_recovery_codes(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<Json<RecoveryCodesResponse>, AppError> {
    let codes = state
        .app_mfa()?
        .regenerate_recovery_codes(&current.user)
        .await?;

    Ok(Json(RecoveryCodesResponse {
        recovery_codes: Some(codes),
    }))
}

// === Email authentication ===

/// POST /settings/security/mfa/email/start（/resend も同じ）
pub async fn start_email_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<StatusCode, AppError> {
    let email_mfa = state.email_mfa()?;
    ensure_two_factor_enabled(&state).await?;

    email_mfa.start(&current.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnableEmailRequest {
    #[garde(length(min = 1))]
    pub code: String,
}

/// POST /settings/security/mfa/email/enable
pub async fn enable_email_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
    AppJson(request): AppJson<EnableEmailRequest>,
) -> Result<StatusCode, AppError> {
    let email_mfa = state.email_mfa()?;
    request.validate().map_err(report_to_error)?;

    email_mfa.enable(&current.user, &request.code).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /settings/security/mfa/email
pub async fn disable_email_authentication(
    State(state): State<AppState>,
    current: CurrentUser,
) -> Result<StatusCode, AppError> {
    state.email_mfa()?.disable(&current.user).await?;
    Ok(StatusCode::NO_CONTENT)
}

// === Helper Functions ===

/// 新規登録は機能設定で無効化できる（既存の登録には影響しない）
async fn ensure_two_factor_enabled(state: &AppState) -> Result<(), AppError> {
    let features = state
        .settings
        .load::<ApplicationFeaturesSettings>()
        .await?;

    if features.two_factor_authentication_enabled {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_request_requires_fields() {
        let request = EnableAppRequest {
            encrypted: "".to_string(),
            code: "123456".to_string(),
        };
        assert!(request.validate().is_err());

        let request = EnableEmailRequest {
            code: "".to_string(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_security_state_shape() {
        let response = SecurityStateResponse {
            must_verify_email: true,
            email_verified: false,
            filament_mfa: MfaState {
                providers: ProviderFlags {
                    app: true,
                    email: false,
                },
                state: ProviderFlags {
                    app: false,
                    email: false,
                },
                options: MfaOptions {
                    app_recovery_codes: true,
                },
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["mustVerifyEmail"], true);
        assert_eq!(json["filamentMfa"]["providers"]["app"], true);
        assert_eq!(json["filamentMfa"]["options"]["appRecoveryCodes"], true);
    }
}
