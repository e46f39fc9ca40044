use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS許可オリジン（カンマ区切り）
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: String,

    // アプリケーション情報（設定マイグレーションの初期値に使用）
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_app_timezone")]
    pub app_timezone: String,
    /// AES-256-GCM キー（Base64エンコード、32バイト）
    ///
    /// セットアップエンベロープと保存済みシークレットの暗号化に使用
    pub app_key: SecretBox<String>,

    // MFA プロバイダー設定
    /// TOTP発行者名（未設定時は app_name）
    #[serde(default)]
    pub totp_issuer: Option<String>,
    #[serde(default = "default_true")]
    pub mfa_app_enabled: bool,
    #[serde(default = "default_true")]
    pub mfa_app_recoverable: bool,
    #[serde(default = "default_true")]
    pub mfa_email_enabled: bool,
    #[serde(default = "default_recovery_code_count")]
    pub recovery_code_count: usize,
    #[serde(default = "default_mfa_setup_ttl_secs")]
    pub mfa_setup_ttl_secs: i64,
    #[serde(default = "default_email_code_ttl_secs")]
    pub email_code_ttl_secs: i64,
    #[serde(default = "default_email_code_resend_decay_secs")]
    pub email_code_resend_decay_secs: i64,
    #[serde(default = "default_email_code_max_attempts")]
    pub email_code_max_attempts: i64,

    // SMTP設定（オプション - email機能有効時のみ使用）
    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<SecretBox<String>>,
    pub smtp_password: Option<SecretBox<String>>,
    #[serde(default)]
    pub mail_from_address: Option<String>,

    // 初期管理者（両方設定時のみ作成）
    #[serde(default)]
    pub admin_email: Option<String>,
    pub admin_password: Option<SecretBox<String>>,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CORS_ALLOWED_ORIGINS: &str = "http://localhost:5173,http://127.0.0.1:5173";
const DEFAULT_APP_NAME: &str = "KoamiStarterKit";
const DEFAULT_APP_TIMEZONE: &str = "UTC";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_RECOVERY_CODE_COUNT: usize = 8;
const DEFAULT_MFA_SETUP_TTL_SECS: i64 = 900;
const DEFAULT_EMAIL_CODE_TTL_SECS: i64 = 240;
const DEFAULT_EMAIL_CODE_RESEND_DECAY_SECS: i64 = 60;
const DEFAULT_EMAIL_CODE_MAX_ATTEMPTS: i64 = 5;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cors_allowed_origins() -> String {
    DEFAULT_CORS_ALLOWED_ORIGINS.to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_app_timezone() -> String {
    DEFAULT_APP_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_recovery_code_count() -> usize {
    DEFAULT_RECOVERY_CODE_COUNT
}

fn default_mfa_setup_ttl_secs() -> i64 {
    DEFAULT_MFA_SETUP_TTL_SECS
}

fn default_email_code_ttl_secs() -> i64 {
    DEFAULT_EMAIL_CODE_TTL_SECS
}

fn default_email_code_resend_decay_secs() -> i64 {
    DEFAULT_EMAIL_CODE_RESEND_DECAY_SECS
}

fn default_email_code_max_attempts() -> i64 {
    DEFAULT_EMAIL_CODE_MAX_ATTEMPTS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// 環境変数の代わりにキー/値の組から読み込む（テスト・組み込み用）
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }

    /// 認証アプリに表示される発行者名
    pub fn issuer(&self) -> &str {
        self.totp_issuer.as_deref().unwrap_or(&self.app_name)
    }

    /// CORS許可オリジンの一覧
    pub fn cors_origins(&self) -> Vec<&str> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    /// SMTP 送信に必要な設定が揃っているか
    pub fn smtp_configured(&self) -> bool {
        self.smtp_host.is_some() && self.mail_from_address.is_some()
    }
}
