use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Session, User};
use crate::services::impersonation::can_access_panel;
use crate::state::AppState;

/// ベアラートークンで認証された操作ユーザー
///
/// なりすまし中は `user` が対象ユーザー、`impersonator_id` が元の管理者
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session: Session,
    pub user: User,
    pub impersonator_id: Option<Uuid>,
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Authentication("missing_token".to_string()))?;

        let (session, user) = state
            .auth_service
            .resolve(token)
            .await?
            .ok_or_else(|| AppError::Authentication("invalid_token".to_string()))?;

        Ok(Self {
            impersonator_id: session.impersonator_id,
            session,
            user,
        })
    }
}

/// 管理パネルに入れる操作ユーザー（super_admin）
#[derive(Debug, Clone)]
pub struct PanelUser(pub CurrentUser);

impl FromRequestParts<AppState> for PanelUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let current = CurrentUser::from_request_parts(parts, state).await?;

        if !can_access_panel(&current.user) {
            tracing::warn!(user_id = %current.user.id, "管理パネルへのアクセス拒否");
            return Err(AppError::Forbidden);
        }

        Ok(Self(current))
    }
}

/// JSON本文（読めない本文も共通のエラー形式で返す）
#[derive(Debug, Clone)]
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                tracing::debug!(error = %rejection.body_text(), "リクエスト本文の解析失敗");
                Err(AppError::validation(
                    "body",
                    "リクエスト本文が正しくありません",
                ))
            }
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
