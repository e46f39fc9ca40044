use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::db;
use crate::state::AppState;

/// ヘルスチェックレスポンス
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// ヘルスチェックハンドラー
///
/// GET /api/health
///
/// サービスとデータベースの稼働状況を返す。
/// データベースに到達できない場合は 503。
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_ok = db::ping(&state.db_pool).await;
    if !database_ok {
        tracing::error!("ヘルスチェック: データベース疎通失敗");
    }

    health_response(database_ok)
}

fn health_response(database_ok: bool) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status, database) = if database_ok {
        (StatusCode::OK, "ok", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            database,
        }),
    )
}
