use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::ActivityEntry;

#[derive(Clone)]
pub struct ActivityRepository {
    pool: SqlitePool,
}

impl ActivityRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// アクティビティを記録（変更と同じトランザクション内で呼び出す）
    pub async fn record(
        conn: &mut SqliteConnection,
        causer_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        event: &str,
        properties: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO activity_log (causer_id, subject_id, event, properties, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(causer_id)
        .bind(subject_id)
        .bind(event)
        .bind(properties.to_string())
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 新しい順に取得
    pub async fn latest(&self, limit: i64) -> Result<Vec<ActivityEntry>, sqlx::Error> {
        sqlx::query_as::<_, ActivityEntry>(
            r#"
            SELECT id, causer_id, subject_id, event, properties, created_at
            FROM activity_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }
}
