use sqlx::SqliteConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::repositories::{EmailChallengeRepository, UserRepository};
use crate::services::EmailService;
use crate::services::token::{hash_token, numeric_code};

/// メール認証コードプロバイダー
///
/// # Security
/// - コードは単回使用（検証成功でチャレンジ削除）
/// - 送信はユーザーごとに `resend_decay_secs` 秒に1回まで
/// - 誤入力が `max_attempts` 回に達したチャレンジは無効
#[derive(Clone)]
pub struct EmailAuthentication {
    challenges: EmailChallengeRepository,
    email_service: EmailService,
    code_ttl_secs: i64,
    resend_decay_secs: i64,
    max_attempts: i64,
}

impl EmailAuthentication {
    pub fn new(
        challenges: EmailChallengeRepository,
        email_service: EmailService,
        code_ttl_secs: i64,
        resend_decay_secs: i64,
        max_attempts: i64,
    ) -> Self {
        Self {
            challenges,
            email_service,
            code_ttl_secs,
            resend_decay_secs,
            max_attempts,
        }
    }

    /// コードを生成して送信
    ///
    /// # Returns
    /// 送信したか（false なら送信間隔制限中で、新しいチャレンジは作られない）
    pub async fn send_code(&self, user: &User) -> Result<bool, AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let code = numeric_code(6);

        let issued = self
            .challenges
            .issue(
                user.id,
                &hash_token(&code),
                now,
                now + self.code_ttl_secs,
                now - self.resend_decay_secs,
            )
            .await?;

        if !issued {
            tracing::warn!(user_id = %user.id, "メール認証コード送信: 送信間隔制限");
            return Ok(false);
        }

        self.email_service.send_email_authentication_code(
            &user.email,
            &code,
            (self.code_ttl_secs + 59) / 60,
        )?;

        tracing::info!(user_id = %user.id, "メール認証コード送信");

        Ok(true)
    }

    /// 次に送信できるまでの秒数
    pub async fn retry_after_secs(&self, user_id: Uuid) -> Result<i64, AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let last_sent_at = self.challenges.last_sent_at(user_id).await?;

        Ok(last_sent_at
            .map(|sent_at| sent_at + self.resend_decay_secs - now)
            .unwrap_or(0)
            .max(0))
    }

    /// 直近に送信したコードを検証（成功時は消費される）
    pub async fn verify_code(&self, user_id: Uuid, code: &str) -> Result<bool, AppError> {
        let code = code.trim();
        let now = OffsetDateTime::now_utc().unix_timestamp();

        if code.len() == 6
            && code.chars().all(|c| c.is_ascii_digit())
            && self
                .challenges
                .consume(user_id, &hash_token(code), now, self.max_attempts)
                .await?
        {
            return Ok(true);
        }

        self.challenges.record_failed_attempt(user_id).await?;
        tracing::warn!(user_id = %user_id, "メール認証コード不一致");

        Ok(false)
    }

    /// メール認証を有効化
    pub async fn enable_email_authentication(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        UserRepository::set_email_authentication(conn, user_id, true).await?;
        Ok(())
    }

    /// メール認証を無効化
    pub async fn disable_email_authentication(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
    ) -> Result<(), AppError> {
        UserRepository::set_email_authentication(conn, user_id, false).await?;
        Ok(())
    }
}
