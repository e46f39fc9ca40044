use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::Session;

const SESSION_COLUMNS: &str = "id, token_hash, user_id, impersonator_id, expires_at, created_at";

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 新しいセッションを作成
    ///
    /// # Arguments
    /// * `token_hash` - ベアラートークンのSHA256ハッシュ
    /// * `expires_at` - 有効期限（UNIX秒）
    pub async fn create(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: i64,
    ) -> Result<Session, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            r#"
            INSERT INTO sessions (id, token_hash, user_id, impersonator_id, expires_at, created_at)
            VALUES (?1, ?2, ?3, NULL, ?4, ?5)
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
    }

    /// 有効期限内のセッションをトークンハッシュで検索
    pub async fn find_active_by_token_hash(
        &self,
        token_hash: &str,
        now: i64,
    ) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE token_hash = ?1 AND expires_at > ?2"
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
    }

    /// セッションを削除
    pub async fn delete(&self, session_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// 指定セッション以外のユーザーのセッションを削除
    ///
    /// # Returns
    /// 削除された行数
    pub async fn delete_others_for_user(
        &self,
        user_id: Uuid,
        keep_session_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE user_id = ?1 AND id <> ?2 AND impersonator_id IS NULL",
        )
        .bind(user_id)
        .bind(keep_session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// なりすましを開始（操作ユーザーを対象ユーザーに切り替え）
    ///
    /// # Returns
    /// 切り替えが行われたか（既になりすまし中なら false）
    pub async fn start_impersonation(
        conn: &mut SqliteConnection,
        session_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET impersonator_id = user_id, user_id = ?2
            WHERE id = ?1 AND impersonator_id IS NULL
            "#,
        )
        .bind(session_id)
        .bind(target_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// なりすましを終了（元の管理者に戻す）
    pub async fn stop_impersonation(
        conn: &mut SqliteConnection,
        session_id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET user_id = impersonator_id, impersonator_id = NULL
            WHERE id = ?1 AND impersonator_id IS NOT NULL
            "#,
        )
        .bind(session_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 期限切れセッションを削除
    ///
    /// # Returns
    /// 削除された行数
    pub async fn delete_expired(&self, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
