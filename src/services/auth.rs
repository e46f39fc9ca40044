use std::sync::OnceLock;
use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::models::{
    AccountType, ApplicationFeaturesSettings, ApplicationSecuritySettings, Role, Session, User,
};
use crate::repositories::{NewUser, SessionRepository, UserRepository};
use crate::services::SettingsStore;
use crate::services::login_throttle::LoginThrottle;
use crate::services::token::{generate_token, hash_token};

/// メールアドレスを保存・検索用の形にそろえる（前後の空白除去と小文字化）
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// パスワードをargon2idでハッシュ化
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュ生成エラー");
            AppError::Internal(anyhow::anyhow!("password hash error"))
        })?;
    Ok(hash.to_string())
}

/// タイミング攻撃対策用のダミーハッシュ
fn dummy_hash() -> Option<&'static str> {
    static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
    DUMMY_HASH
        .get_or_init(|| hash_password("koami-dummy-password").ok())
        .as_deref()
}

/// 発行したセッション
#[derive(Debug)]
pub struct IssuedSession {
    /// ベアラートークン（平文を返すのはこの1回のみ）
    pub token: String,
    pub session: Session,
}

/// 登録入力
#[derive(Debug)]
pub struct Registration<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// 認証サービス
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    sessions: SessionRepository,
    settings: SettingsStore,
    throttle: LoginThrottle,
}

impl AuthService {
    /// 新しい AuthService を作成
    pub fn new(
        users: UserRepository,
        sessions: SessionRepository,
        settings: SettingsStore,
        throttle: LoginThrottle,
    ) -> Self {
        Self {
            users,
            sessions,
            settings,
            throttle,
        }
    }

    /// ユーザー認証を実行
    ///
    /// 失敗履歴はログイン完了（MFA含む）まで残す。
    /// タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        let email = email.as_str();
        let security = self.settings.load::<ApplicationSecuritySettings>().await?;
        let max_attempts = usize::try_from(security.login_rate_limit).unwrap_or(1);
        let window = Duration::from_secs(security.login_rate_limit_decay.unsigned_abs());

        if let Some(retry_after) = self.throttle.check(email, max_attempts, window).await {
            tracing::warn!(email = %email, "ログイン試行回数超過");
            return Err(AppError::RateLimited {
                retry_after_secs: i64::try_from(retry_after).unwrap_or(i64::MAX),
            });
        }

        let user = self.users.find_by_email(email).await?;

        let verified = match &user {
            Some(user) => match &user.password_hash {
                Some(hash) => self.verify_password(password, hash)?,
                None => {
                    // パスワード未設定（サービスアカウントなど）
                    self.verify_dummy(password);
                    false
                }
            },
            None => {
                // ユーザーの存在有無を応答時間から推測できないようにする
                self.verify_dummy(password);
                false
            }
        };

        match user {
            Some(user) if verified => {
                tracing::info!(user_id = %user.id, "認証成功");
                Ok(user)
            }
            _ => {
                self.throttle.hit(email).await;
                tracing::warn!(email = %email, "認証失敗");
                Err(AppError::Authentication("invalid_credentials".to_string()))
            }
        }
    }

    /// ログイン失敗を記録（MFAコード不一致など）
    pub async fn record_failure(&self, email: &str) {
        self.throttle.hit(email).await;
    }

    /// ログイン完了時に失敗履歴を消す
    pub async fn clear_failures(&self, email: &str) {
        self.throttle.clear(email).await;
    }

    /// セッションを発行
    ///
    /// 有効期間は `session_lifetime`（分）。`single_session` 有効時は他のセッションを破棄する。
    pub async fn issue_session(&self, user: &User) -> Result<IssuedSession, AppError> {
        let security = self.settings.load::<ApplicationSecuritySettings>().await?;
        let now = OffsetDateTime::now_utc().unix_timestamp();

        let expired = self.sessions.delete_expired(now).await?;
        if expired > 0 {
            tracing::debug!(count = expired, "期限切れセッション削除");
        }

        let token = generate_token();
        let session = self
            .sessions
            .create(
                user.id,
                &hash_token(&token),
                now + security.session_lifetime * 60,
            )
            .await?;

        if security.single_session {
            let revoked = self
                .sessions
                .delete_others_for_user(user.id, session.id)
                .await?;
            tracing::info!(user_id = %user.id, revoked, "他のセッションを破棄");
        }

        tracing::info!(user_id = %user.id, "セッション発行");

        Ok(IssuedSession { token, session })
    }

    /// ベアラートークンからセッションと操作ユーザーを解決
    pub async fn resolve(&self, token: &str) -> Result<Option<(Session, User)>, AppError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let Some(session) = self
            .sessions
            .find_active_by_token_hash(&hash_token(token), now)
            .await?
        else {
            return Ok(None);
        };

        let Some(user) = self.users.find_by_id(session.user_id).await? else {
            return Ok(None);
        };

        Ok(Some((session, user)))
    }

    /// セッションを破棄
    pub async fn revoke(&self, session: &Session) -> Result<(), AppError> {
        self.sessions.delete(session.id).await?;
        tracing::info!(user_id = %session.user_id, "ログアウト完了");
        Ok(())
    }

    /// ユーザー登録
    ///
    /// # Errors
    /// - 登録無効: `NotFound`
    /// - パスワードポリシー違反: `ValidationReport`
    /// - メールアドレス重複: `EmailAlreadyExists`
    pub async fn register(&self, registration: Registration<'_>) -> Result<User, AppError> {
        let features = self.settings.load::<ApplicationFeaturesSettings>().await?;
        if !features.registration_enabled {
            return Err(AppError::NotFound);
        }

        let security = self.settings.load::<ApplicationSecuritySettings>().await?;
        let violations = security.password_violations(registration.password);
        if !violations.is_empty() {
            return Err(AppError::ValidationReport(
                violations
                    .into_iter()
                    .map(|message| ("password".to_string(), message))
                    .collect(),
            ));
        }

        let email = normalize_email(registration.email);
        let password_hash = hash_password(registration.password)?;
        let email_verified_at =
            (!features.email_verification_required).then(OffsetDateTime::now_utc);

        let mut user = self
            .users
            .create_user(NewUser {
                name: registration.name,
                email: &email,
                password_hash: Some(&password_hash),
                account_type: AccountType::Standard,
                email_verified_at,
            })
            .await
            .map_err(map_unique_violation)?;

        if let Some(role) = features.default_user_role {
            self.users.assign_role(user.id, role).await?;
            user.roles.push(role);
        }

        tracing::info!(user_id = %user.id, "ユーザー登録成功");

        Ok(user)
    }

    /// 初期管理者を用意（既存なら super_admin ロールのみ保証）
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = normalize_email(email);
        let mut user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                let password_hash = hash_password(password)?;
                self.users
                    .create_user(NewUser {
                        name: "Administrator",
                        email: &email,
                        password_hash: Some(&password_hash),
                        account_type: AccountType::Standard,
                        email_verified_at: Some(OffsetDateTime::now_utc()),
                    })
                    .await
                    .map_err(map_unique_violation)?
            }
        };

        if !user.has_role(Role::SuperAdmin) {
            self.users.assign_role(user.id, Role::SuperAdmin).await?;
            user.roles.push(Role::SuperAdmin);
            tracing::info!(user_id = %user.id, "初期管理者を作成");
        }

        Ok(user)
    }

    /// パスワードを検証
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
            AppError::Internal(anyhow::anyhow!("password hash parse error"))
        })?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn verify_dummy(&self, password: &str) {
        if let Some(hash) = dummy_hash() {
            let _ = self.verify_password(password, hash);
        }
    }
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &e
        && db_err.is_unique_violation()
    {
        return AppError::EmailAlreadyExists;
    }
    AppError::Database(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_verifies() {
        let hash = hash_password("Password123").unwrap();
        let parsed = PasswordHash::new(&hash).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"Password123", &parsed)
                .is_ok()
        );
        assert!(
            Argon2::default()
                .verify_password(b"password123", &parsed)
                .is_err()
        );
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
        assert_eq!(normalize_email("bob@example.com"), "bob@example.com");
    }

    #[test]
    fn test_dummy_hash_is_parseable() {
        let hash = dummy_hash().unwrap();
        assert!(PasswordHash::new(hash).is_ok());
    }
}
