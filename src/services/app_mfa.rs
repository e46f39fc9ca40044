use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Capability, User};
use crate::services::activity::ActivityLog;
use crate::services::app_authentication::AppAuthentication;
use crate::services::crypto::Encrypter;

/// セットアップ中の登録情報（暗号化してクライアントに渡す）
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PendingEnrollment {
    secret: String,
    recovery_codes: Option<Vec<String>>,
    user_id: Uuid,
    issued_at: i64,
}

/// セットアップ応答
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSetup {
    pub encrypted: String,
    pub secret: String,
    pub qr_code_data_uri: String,
    pub recovery_codes: Option<Vec<String>>,
}

/// 認証アプリの登録フロー
///
/// NotEnrolled -> SetupPending -> Enrolled -> NotEnrolled。
/// SetupPending はサーバーに保存されず、暗号化エンベロープだけが状態を運ぶ。
#[derive(Clone)]
pub struct AppMfaService {
    pool: SqlitePool,
    provider: AppAuthentication,
    encrypter: Encrypter,
    activity: ActivityLog,
    setup_ttl_secs: i64,
}

impl AppMfaService {
    pub fn new(
        pool: SqlitePool,
        provider: AppAuthentication,
        encrypter: Encrypter,
        activity: ActivityLog,
        setup_ttl_secs: i64,
    ) -> Self {
        Self {
            pool,
            provider,
            encrypter,
            activity,
            setup_ttl_secs,
        }
    }

    pub fn provider(&self) -> &AppAuthentication {
        &self.provider
    }

    /// セットアップ開始（永続化はしない）
    pub fn setup(&self, user: &User) -> Result<AppSetup, AppError> {
        user.require(Capability::AppAuthentication)?;

        if user.has_app_authentication() {
            return Err(AppError::AppAuthenticationAlreadyEnabled);
        }

        let secret = self.provider.generate_secret();
        let recovery_codes = self
            .provider
            .is_recoverable()
            .then(|| self.provider.generate_recovery_codes());

        let encrypted = self.encrypter.seal(&PendingEnrollment {
            secret: secret.clone(),
            recovery_codes: recovery_codes.clone(),
            user_id: user.id,
            issued_at: OffsetDateTime::now_utc().unix_timestamp(),
        })?;

        let qr_code_data_uri = self
            .provider
            .generate_qr_code_data_uri(&user.email, &secret)?;

        tracing::info!(user_id = %user.id, "認証アプリのセットアップ開始");

        Ok(AppSetup {
            encrypted,
            secret,
            qr_code_data_uri,
            recovery_codes,
        })
    }

    /// エンベロープとコードを検証して有効化
    ///
    /// # Returns
    /// 発行したリカバリーコード（平文を返すのはこの1回のみ）
    ///
    /// # Errors
    /// - エンベロープ改ざん・期限切れ: `EnvelopeInvalid`
    /// - 他ユーザーのエンベロープ: `Forbidden`（コードの正否に関係なく）
    /// - コード不一致: `Validation`
    pub async fn enable(
        &self,
        user: &User,
        encrypted: &str,
        code: &str,
    ) -> Result<Option<Vec<String>>, AppError> {
        user.require(Capability::AppAuthentication)?;
        if self.provider.is_recoverable() {
            user.require(Capability::AppAuthenticationRecovery)?;
        }

        let pending: PendingEnrollment = self.encrypter.open(encrypted).map_err(|_| {
            tracing::warn!(user_id = %user.id, "セットアップエンベロープの復号失敗");
            AppError::EnvelopeInvalid
        })?;

        let age = OffsetDateTime::now_utc().unix_timestamp() - pending.issued_at;
        if age > self.setup_ttl_secs || age < 0 {
            tracing::warn!(user_id = %user.id, age, "セットアップエンベロープの期限切れ");
            return Err(AppError::EnvelopeInvalid);
        }

        if pending.user_id != user.id {
            tracing::warn!(
                user_id = %user.id,
                envelope_user_id = %pending.user_id,
                "他ユーザーのセットアップエンベロープ"
            );
            return Err(AppError::Forbidden);
        }

        if !self.provider.verify_code(code.trim(), &pending.secret)? {
            tracing::warn!(user_id = %user.id, "認証アプリ有効化: コード不一致");
            return Err(AppError::invalid_code());
        }

        if user.has_app_authentication() {
            return Err(AppError::AppAuthenticationAlreadyEnabled);
        }

        // 非リカバリー構成では以前のコードも消す
        let recovery_codes = if self.provider.is_recoverable() {
            pending.recovery_codes
        } else {
            None
        };

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        // 読み込み後に別リクエストで登録された場合はここで弾く（ロールバック）
        if !self
            .provider
            .enroll_secret(&mut tx, user.id, &pending.secret)
            .await?
        {
            tracing::warn!(user_id = %user.id, "認証アプリ有効化: 既に登録済み");
            return Err(AppError::AppAuthenticationAlreadyEnabled);
        }
        self.provider
            .save_recovery_codes(&mut tx, user.id, recovery_codes.as_deref())
            .await?;
        recorder
            .record(
                &mut tx,
                Some(user.id),
                Some(user.id),
                "app_authentication.enabled",
                json!({ "recoverable": recovery_codes.is_some() }),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "認証アプリ有効化完了");

        Ok(recovery_codes)
    }

    /// 無効化（シークレットとリカバリーコードを同時に削除）
    pub async fn disable(&self, user: &User) -> Result<(), AppError> {
        user.require(Capability::AppAuthentication)?;

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        self.provider.remove(&mut tx, user.id).await?;
        recorder
            .record(
                &mut tx,
                Some(user.id),
                Some(user.id),
                "app_authentication.disabled",
                json!({}),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "認証アプリ無効化完了");

        Ok(())
    }

    /// リカバリーコードを再発行
    pub async fn regenerate_recovery_codes(&self, user: &User) -> Result<Vec<String>, AppError> {
        user.require(Capability::AppAuthentication)?;

        if !self.provider.is_recoverable() {
            return Err(AppError::NotFound);
        }
        user.require(Capability::AppAuthenticationRecovery)?;

        if !user.has_app_authentication() {
            return Err(AppError::AppAuthenticationNotEnabled);
        }

        let codes = self.provider.generate_recovery_codes();

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        if !self
            .provider
            .replace_recovery_codes(&mut tx, user.id, &codes)
            .await?
        {
            tracing::warn!(user_id = %user.id, "リカバリーコード再発行: 無効化済み");
            return Err(AppError::AppAuthenticationNotEnabled);
        }
        recorder
            .record(
                &mut tx,
                Some(user.id),
                Some(user.id),
                "app_authentication.recovery_codes_regenerated",
                json!({ "count": codes.len() }),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(user_id = %user.id, "リカバリーコード再発行");

        Ok(codes)
    }
}
