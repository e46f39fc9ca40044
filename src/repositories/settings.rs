use serde_json::{Map, Value};
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;

use crate::error::AppError;

/// キー/値形式の設定ストア（1行 = 1キー、値はJSON）
#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// グループの全キーをJSONオブジェクトとして取得
    pub async fn load_group(&self, group: &str) -> Result<Map<String, Value>, AppError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(r#"SELECT name, payload FROM settings WHERE "group" = ?1"#)
                .bind(group)
                .fetch_all(&self.pool)
                .await?;

        let mut map = Map::with_capacity(rows.len());
        for (name, payload) in rows {
            let value = serde_json::from_str(&payload).map_err(|e| {
                tracing::error!(error = ?e, group, name = %name, "設定値のデコードエラー");
                AppError::Internal(anyhow::anyhow!("invalid settings payload"))
            })?;
            map.insert(name, value);
        }

        Ok(map)
    }

    /// 値を書き込む（存在しなければ作成）
    pub async fn upsert(
        conn: &mut SqliteConnection,
        group: &str,
        name: &str,
        value: &Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO settings ("group", name, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT ("group", name) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(group)
        .bind(name)
        .bind(value.to_string())
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// キーが存在しない場合のみ作成
    ///
    /// # Returns
    /// 作成したか（既存なら false）
    pub async fn insert_if_absent(
        conn: &mut SqliteConnection,
        group: &str,
        name: &str,
        value: &Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO settings ("group", name, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT ("group", name) DO NOTHING
            "#,
        )
        .bind(group)
        .bind(name)
        .bind(value.to_string())
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 適用済み設定マイグレーション名（昇順）
    pub async fn applied_migrations(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT name FROM settings_migrations ORDER BY name")
            .fetch_all(&self.pool)
            .await
    }

    /// 設定マイグレーションを適用済みとして記録
    pub async fn record_migration(
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO settings_migrations (name, applied_at) VALUES (?1, ?2)",
        )
        .bind(name)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }
}
