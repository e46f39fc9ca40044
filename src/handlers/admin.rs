use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::extract::{AppJson, PanelUser};
use crate::models::{ActivityEntry, ApplicationFeaturesSettings, AuthLayout, SettingsGroup};
use crate::state::AppState;

const DEFAULT_ACTIVITY_LIMIT: i64 = 50;
const MAX_ACTIVITY_LIMIT: i64 = 200;

// === Settings pages ===

/// GET /admin/settings/{page}
///
/// グループ全体をフォームの初期値として返す
pub async fn show_settings<G: SettingsGroup>(
    State(state): State<AppState>,
    _panel: PanelUser,
) -> Result<Json<G>, AppError> {
    Ok(Json(state.settings.load::<G>().await?))
}

/// PUT /admin/settings/{page}
///
/// グループ全体を検証して保存。1項目でも不正なら何も保存しない。
pub async fn update_settings<G: SettingsGroup>(
    State(state): State<AppState>,
    PanelUser(current): PanelUser,
    AppJson(body): AppJson<Value>,
) -> Result<Json<G>, AppError> {
    let settings = state.settings.parse_group::<G>(body).await?;
    state
        .settings
        .save(&settings, Some(current.user.id))
        .await?;

    tracing::info!(user_id = %current.user.id, group = G::GROUP, "設定ページを保存");

    Ok(Json(state.settings.load::<G>().await?))
}

#[derive(Debug, Serialize)]
pub struct SettingValue {
    pub group: String,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Deserialize)]
pub struct SetValueRequest {
    pub value: Value,
}

/// GET /admin/settings/{group}/{key}
pub async fn show_setting_value(
    State(state): State<AppState>,
    _panel: PanelUser,
    Path((group, key)): Path<(String, String)>,
) -> Result<Json<SettingValue>, AppError> {
    let value = state.settings.get(&group, &key).await?;
    Ok(Json(SettingValue { group, key, value }))
}

/// PUT /admin/settings/{group}/{key}
///
/// 単一キーの更新もグループ全体として検証する
pub async fn update_setting_value(
    State(state): State<AppState>,
    PanelUser(current): PanelUser,
    Path((group, key)): Path<(String, String)>,
    AppJson(request): AppJson<SetValueRequest>,
) -> Result<Json<SettingValue>, AppError> {
    state
        .settings
        .set(&group, &key, request.value, Some(current.user.id))
        .await?;

    let value = state.settings.get(&group, &key).await?;
    Ok(Json(SettingValue { group, key, value }))
}

// === Auth layout ===

#[derive(Debug, Serialize)]
pub struct LayoutOption {
    pub value: AuthLayout,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AuthLayoutResponse {
    pub layout: AuthLayout,
    pub available: Vec<LayoutOption>,
}

/// GET /api/auth/layout
///
/// 認証画面のレイアウト（キャッシュ済みの設定から読む）
pub async fn auth_layout(State(state): State<AppState>) -> Result<Json<AuthLayoutResponse>, AppError> {
    let features = state
        .settings
        .load::<ApplicationFeaturesSettings>()
        .await?;

    Ok(Json(AuthLayoutResponse {
        layout: features.auth_layout,
        available: AuthLayout::available()
            .into_iter()
            .map(|(value, label)| LayoutOption { value, label })
            .collect(),
    }))
}

// === Activity log ===

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

/// GET /admin/activity?limit=N
pub async fn list_activity(
    State(state): State<AppState>,
    _panel: PanelUser,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Vec<ActivityEntry>>, AppError> {
    let limit = activity_limit(query.limit);
    Ok(Json(state.activity_repo.latest(limit).await?))
}

fn activity_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT)
}
