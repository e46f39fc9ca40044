use std::sync::Arc;

use secrecy::ExposeSecret;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::{
    ActivityRepository, EmailChallengeRepository, SessionRepository, SettingsRepository,
    UserRepository,
};
use crate::services::email::OutgoingMail;
use crate::services::{
    ActivityLog, AppAuthentication, AppMfaService, AuthService, EmailAuthentication,
    EmailMfaService, EmailService, Encrypter, ImpersonationService, LoginThrottle, SettingsStore,
};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。
#[derive(Clone)]
pub struct AppState {
    /// SQLite コネクションプール
    pub db_pool: SqlitePool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    pub user_repo: UserRepository,
    pub activity_repo: ActivityRepository,
    /// 型付き設定ストア
    pub settings: SettingsStore,
    pub auth_service: AuthService,
    pub impersonation_service: ImpersonationService,
    /// 認証アプリ（無効化されている場合は None）
    pub app_mfa: Option<AppMfaService>,
    /// メール認証（無効化されている場合は None）
    pub email_mfa: Option<EmailMfaService>,
}

impl AppState {
    /// 新しい AppState を作成
    ///
    /// # Arguments
    /// * `mail_sender` - メール配送キュー（受信側は `run_delivery` に渡す）
    pub fn new(
        db_pool: SqlitePool,
        config: Config,
        mail_sender: mpsc::UnboundedSender<OutgoingMail>,
    ) -> Result<Self, AppError> {
        let config = Arc::new(config);
        let user_repo = UserRepository::new(db_pool.clone());
        let activity_repo = ActivityRepository::new(db_pool.clone());
        let settings = SettingsStore::new(SettingsRepository::new(db_pool.clone()));
        let activity = ActivityLog::new(settings.clone());
        let encrypter = Encrypter::new(config.app_key.expose_secret())?;

        let auth_service = AuthService::new(
            user_repo.clone(),
            SessionRepository::new(db_pool.clone()),
            settings.clone(),
            LoginThrottle::new(),
        );

        let impersonation_service = ImpersonationService::new(
            db_pool.clone(),
            user_repo.clone(),
            settings.clone(),
            activity.clone(),
        );

        // 認証アプリ（設定で無効ならパネルに登録しない）
        let app_mfa = if config.mfa_app_enabled {
            tracing::info!(recoverable = config.mfa_app_recoverable, "認証アプリ MFA を登録");
            Some(AppMfaService::new(
                db_pool.clone(),
                AppAuthentication::new(
                    config.issuer().to_string(),
                    encrypter.clone(),
                    config.mfa_app_recoverable,
                    config.recovery_code_count,
                ),
                encrypter.clone(),
                activity.clone(),
                config.mfa_setup_ttl_secs,
            ))
        } else {
            tracing::info!("認証アプリ MFA 無効（スキップ）");
            None
        };

        // メール認証（設定で無効ならパネルに登録しない）
        let email_mfa = if config.mfa_email_enabled {
            tracing::info!("メール認証 MFA を登録");
            Some(EmailMfaService::new(
                db_pool.clone(),
                EmailAuthentication::new(
                    EmailChallengeRepository::new(db_pool.clone()),
                    EmailService::new(mail_sender),
                    config.email_code_ttl_secs,
                    config.email_code_resend_decay_secs,
                    config.email_code_max_attempts,
                ),
                activity.clone(),
            ))
        } else {
            tracing::info!("メール認証 MFA 無効（スキップ）");
            None
        };

        Ok(Self {
            db_pool,
            config,
            user_repo,
            activity_repo,
            settings,
            auth_service,
            impersonation_service,
            app_mfa,
            email_mfa,
        })
    }

    /// 認証アプリ MFA（未登録なら 404）
    pub fn app_mfa(&self) -> Result<&AppMfaService, AppError> {
        self.app_mfa.as_ref().ok_or(AppError::NotFound)
    }

    /// メール認証 MFA（未登録なら 404）
    pub fn email_mfa(&self) -> Result<&EmailMfaService, AppError> {
        self.email_mfa.as_ref().ok_or(AppError::NotFound)
    }
}
