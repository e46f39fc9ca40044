use std::collections::BTreeMap;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("認証エラー: {0}")]
    Authentication(String),

    /// 単一フィールドのバリデーションエラー
    #[error("バリデーションエラー: {field}: {message}")]
    Validation { field: String, message: String },

    /// 複数フィールドのバリデーションエラー（設定グループ保存時など）
    #[error("バリデーションエラー")]
    ValidationReport(Vec<(String, String)>),

    #[error("この操作は許可されていません")]
    Forbidden,

    #[error("リソースが見つかりません")]
    NotFound,

    #[error("データベースエラー")]
    Database(#[from] sqlx::Error),

    #[error("内部エラー")]
    Internal(#[from] anyhow::Error),

    /// ユーザー種別が必要な機能を持たない（デプロイ構成の不整合）
    #[error("ユーザーに必要な機能がありません: {0}")]
    MissingCapability(&'static str),

    #[error("このメールアドレスは既に使用されています")]
    EmailAlreadyExists,

    #[error("セットアップデータが無効または期限切れです")]
    EnvelopeInvalid,

    #[error("認証アプリは既に有効です")]
    AppAuthenticationAlreadyEnabled,

    #[error("認証アプリが有効化されていません")]
    AppAuthenticationNotEnabled,

    #[error("リクエストが多すぎます")]
    RateLimited { retry_after_secs: i64 },
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 認証コード不一致のバリデーションエラー
    pub fn invalid_code() -> Self {
        Self::validation("code", "認証コードが正しくありません")
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<BTreeMap<String, Vec<String>>>,
}

impl ErrorResponse {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            errors: None,
        }
    }

    fn fields(pairs: Vec<(String, String)>) -> Self {
        let mut errors: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, message) in pairs {
            errors.entry(field).or_default().push(message);
        }
        Self {
            error: "入力内容に誤りがあります".to_string(),
            errors: Some(errors),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::message("認証に失敗しました"),
            ),
            Self::Validation { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::fields(vec![(field, message)]),
            ),
            Self::ValidationReport(pairs) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::fields(pairs),
            ),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                ErrorResponse::message("この操作は許可されていません"),
            ),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorResponse::message("リソースが見つかりません"),
            ),
            Self::Database(e) => {
                tracing::error!(error = ?e, "データベースエラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message("内部エラーが発生しました"),
                )
            }
            Self::Internal(e) => {
                tracing::error!(error = ?e, "内部エラー");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message("内部エラーが発生しました"),
                )
            }
            Self::MissingCapability(capability) => {
                tracing::error!(capability, "ユーザー種別と MFA 構成の不整合");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::message("内部エラーが発生しました"),
                )
            }
            Self::EmailAlreadyExists => (
                StatusCode::CONFLICT,
                ErrorResponse::message("このメールアドレスは既に使用されています"),
            ),
            Self::EnvelopeInvalid => {
                tracing::warn!("無効なセットアップエンベロープ（改ざんまたは期限切れ）");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::message("セットアップデータが無効または期限切れです"),
                )
            }
            Self::AppAuthenticationAlreadyEnabled => (
                StatusCode::CONFLICT,
                ErrorResponse::message("認証アプリは既に有効です"),
            ),
            Self::AppAuthenticationNotEnabled => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::message("認証アプリが有効化されていません"),
            ),
            Self::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorResponse::message(
                        "リクエストが多すぎます。しばらく待ってから再度お試しください",
                    )),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after_secs.max(1).to_string()) {
                    response.headers_mut().insert(RETRY_AFTER, value);
                }
                return response;
            }
        };

        (status, Json(body)).into_response()
    }
}
