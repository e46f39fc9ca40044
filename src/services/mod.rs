pub mod activity;
pub mod app_authentication;
pub mod app_mfa;
pub mod auth;
pub mod crypto;
pub mod email;
pub mod email_authentication;
pub mod email_mfa;
pub mod impersonation;
pub mod login_throttle;
pub mod settings;
pub mod settings_migrations;
pub mod token;

pub use activity::ActivityLog;
pub use app_authentication::AppAuthentication;
pub use app_mfa::AppMfaService;
pub use auth::AuthService;
pub use crypto::Encrypter;
pub use email::EmailService;
pub use email_authentication::EmailAuthentication;
pub use email_mfa::EmailMfaService;
pub use impersonation::ImpersonationService;
pub use login_throttle::LoginThrottle;
pub use settings::SettingsStore;
pub use settings_migrations::SettingsMigrator;
