use serde_json::json;
use sqlx::SqlitePool;

use crate::error::AppError;
use crate::models::{Capability, User};
use crate::services::activity::ActivityLog;
use crate::services::email_authentication::EmailAuthentication;

/// メール認証の登録フロー
#[derive(Clone)]
pub struct EmailMfaService {
    pool: SqlitePool,
    provider: EmailAuthentication,
    activity: ActivityLog,
}

impl EmailMfaService {
    pub fn new(pool: SqlitePool, provider: EmailAuthentication, activity: ActivityLog) -> Self {
        Self {
            pool,
            provider,
            activity,
        }
    }

    pub fn provider(&self) -> &EmailAuthentication {
        &self.provider
    }

    /// コード送信（再送も同じ）
    ///
    /// # Errors
    /// - メール未確認: `Validation`
    /// - 送信間隔制限中: `RateLimited`
    pub async fn start(&self, user: &User) -> Result<(), AppError> {
        user.require(Capability::EmailAuthentication)?;
        user.require(Capability::MustVerifyEmail)?;

        if !user.has_verified_email() {
            return Err(AppError::validation(
                "email",
                "メールアドレスを確認してから設定してください",
            ));
        }

        if !self.provider.send_code(user).await? {
            let retry_after_secs = self.provider.retry_after_secs(user.id).await?;
            return Err(AppError::RateLimited { retry_after_secs });
        }

        Ok(())
    }

    /// コードを検証して有効化
    pub async fn enable(&self, user: &User, code: &str) -> Result<(), AppError> {
        user.require(Capability::EmailAuthentication)?;

        if !self.provider.verify_code(user.id, code).await? {
            return Err(AppError::invalid_code());
        }

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        self.provider
            .enable_email_authentication(&mut tx, user.id)
            .await?;
        recorder
            .record(
                &mut tx,
                Some(user.id),
                Some(user.id),
                "email_authentication.enabled",
                json!({}),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "メール認証有効化完了");

        Ok(())
    }

    /// 無効化（コード確認なし）
    pub async fn disable(&self, user: &User) -> Result<(), AppError> {
        user.require(Capability::EmailAuthentication)?;

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        self.provider
            .disable_email_authentication(&mut tx, user.id)
            .await?;
        recorder
            .record(
                &mut tx,
                Some(user.id),
                Some(user.id),
                "email_authentication.disabled",
                json!({}),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "メール認証無効化完了");

        Ok(())
    }
}
