use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// 監査用のアクティビティログ
#[derive(Debug, FromRow, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    pub causer_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub event: String,
    #[sqlx(json)]
    pub properties: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
