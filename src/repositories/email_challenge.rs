use sqlx::SqlitePool;
use uuid::Uuid;

/// メール認証コードのチャレンジ
///
/// ユーザーごとに1件のみ保持する。コード自体はSHA256ハッシュで保存。
#[derive(Clone)]
pub struct EmailChallengeRepository {
    pool: SqlitePool,
}

impl EmailChallengeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// チャレンジを発行（送信間隔制限付き）
    ///
    /// 直前のチャレンジが `resend_after` 以前に送信されている場合のみ置き換える。
    /// 判定と書き込みは1文で行うため、同時リクエストでも1件しか通らない。
    ///
    /// # Returns
    /// 発行できたか（false なら送信間隔制限中）
    pub async fn issue(
        &self,
        user_id: Uuid,
        code_hash: &str,
        now: i64,
        expires_at: i64,
        resend_after: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO email_authentication_challenges (user_id, code_hash, sent_at, expires_at, attempts)
            VALUES (?1, ?2, ?3, ?4, 0)
            ON CONFLICT (user_id) DO UPDATE SET
                code_hash = excluded.code_hash,
                sent_at = excluded.sent_at,
                expires_at = excluded.expires_at,
                attempts = 0
            WHERE email_authentication_challenges.sent_at <= ?5
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(now)
        .bind(expires_at)
        .bind(resend_after)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 直近の送信時刻（UNIX秒）
    pub async fn last_sent_at(&self, user_id: Uuid) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT sent_at FROM email_authentication_challenges WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// コードを消費
    ///
    /// 一致・有効期限内・試行回数内のチャレンジを削除できた場合のみ成功。
    /// 削除により同じコードは二度と通らない。
    pub async fn consume(
        &self,
        user_id: Uuid,
        code_hash: &str,
        now: i64,
        max_attempts: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM email_authentication_challenges
            WHERE user_id = ?1 AND code_hash = ?2 AND expires_at > ?3 AND attempts < ?4
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .bind(now)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 失敗回数を加算
    pub async fn record_failed_attempt(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE email_authentication_challenges SET attempts = attempts + 1 WHERE user_id = ?1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
