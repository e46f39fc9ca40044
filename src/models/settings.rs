use garde::Validate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::models::Role;

/// 型付き設定グループ
///
/// 各フィールドが `settings` テーブルの (group, name) 行に対応する。
pub trait SettingsGroup:
    Serialize + DeserializeOwned + Validate<Context = ()> + Clone + Send + Sync + 'static
{
    const GROUP: &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ApplicationDetailsSettings {
    #[garde(length(chars, min = 1, max = 255))]
    pub site_name: String,
    #[garde(length(chars, min = 1, max = 500))]
    pub site_description: String,
    #[garde(url, length(max = 500))]
    pub site_logo_url: Option<String>,
    #[garde(url, length(max = 500))]
    pub site_favicon_url: Option<String>,
    #[garde(length(min = 1, max = 100))]
    pub timezone: String,
    #[garde(length(min = 1, max = 20))]
    pub date_format: String,
    #[garde(length(min = 1, max = 20))]
    pub time_format: String,
    #[garde(email, length(max = 255))]
    pub contact_email: Option<String>,
    #[garde(url, length(max = 500))]
    pub support_url: Option<String>,
}

impl SettingsGroup for ApplicationDetailsSettings {
    const GROUP: &'static str = "application_details";
}

/// 認証画面のレイアウト
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLayout {
    Simple,
    Card,
    Split,
}

impl AuthLayout {
    /// 選択肢と表示名
    pub fn available() -> [(AuthLayout, &'static str); 3] {
        [
            (Self::Simple, "Simple Layout"),
            (Self::Card, "Card Layout"),
            (Self::Split, "Split Layout"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ApplicationFeaturesSettings {
    #[garde(skip)]
    pub registration_enabled: bool,
    #[garde(skip)]
    pub email_verification_required: bool,
    #[garde(skip)]
    pub two_factor_authentication_enabled: bool,
    #[garde(skip)]
    pub password_reset_enabled: bool,
    #[garde(skip)]
    pub user_impersonation_enabled: bool,
    #[garde(skip)]
    pub default_user_role: Option<Role>,
    #[garde(skip)]
    pub activity_log_enabled: bool,
    #[garde(skip)]
    pub notifications_enabled: bool,
    #[garde(skip)]
    pub auth_layout: AuthLayout,
}

impl SettingsGroup for ApplicationFeaturesSettings {
    const GROUP: &'static str = "application_features";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ApplicationSecuritySettings {
    #[garde(range(min = 6, max = 128))]
    pub password_min_length: i64,
    #[garde(skip)]
    pub password_requires_uppercase: bool,
    #[garde(skip)]
    pub password_requires_lowercase: bool,
    #[garde(skip)]
    pub password_requires_numbers: bool,
    #[garde(skip)]
    pub password_requires_symbols: bool,
    /// 分
    #[garde(range(min = 5, max = 1440))]
    pub session_lifetime: i64,
    #[garde(skip)]
    pub single_session: bool,
    #[garde(range(min = 1, max = 100))]
    pub login_rate_limit: i64,
    /// 秒
    #[garde(range(min = 30, max = 3600))]
    pub login_rate_limit_decay: i64,
}

impl SettingsGroup for ApplicationSecuritySettings {
    const GROUP: &'static str = "application_security";
}

impl ApplicationSecuritySettings {
    /// パスワードポリシー違反をすべて返す
    pub fn password_violations(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();
        if (password.chars().count() as i64) < self.password_min_length {
            violations.push(format!(
                "パスワードは{}文字以上で入力してください",
                self.password_min_length
            ));
        }
        if self.password_requires_uppercase && !password.chars().any(|c| c.is_uppercase()) {
            violations.push("パスワードには大文字を含めてください".to_string());
        }
        if self.password_requires_lowercase && !password.chars().any(|c| c.is_lowercase()) {
            violations.push("パスワードには小文字を含めてください".to_string());
        }
        if self.password_requires_numbers && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("パスワードには数字を含めてください".to_string());
        }
        if self.password_requires_symbols
            && !password
                .chars()
                .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
        {
            violations.push("パスワードには記号を含めてください".to_string());
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> ApplicationSecuritySettings {
        ApplicationSecuritySettings {
            password_min_length: 8,
            password_requires_uppercase: true,
            password_requires_lowercase: true,
            password_requires_numbers: true,
            password_requires_symbols: false,
            session_lifetime: 120,
            single_session: false,
            login_rate_limit: 5,
            login_rate_limit_decay: 60,
        }
    }

    fn details() -> ApplicationDetailsSettings {
        ApplicationDetailsSettings {
            site_name: "Koami".to_string(),
            site_description: "desc".to_string(),
            site_logo_url: None,
            site_favicon_url: None,
            timezone: "UTC".to_string(),
            date_format: "Y-m-d".to_string(),
            time_format: "H:i:s".to_string(),
            contact_email: None,
            support_url: None,
        }
    }

    #[test]
    fn test_security_ranges() {
        assert!(security().validate().is_ok());

        let mut s = security();
        s.password_min_length = 3;
        assert!(s.validate().is_err());

        let mut s = security();
        s.session_lifetime = 1441;
        assert!(s.validate().is_err());

        let mut s = security();
        s.login_rate_limit_decay = 29;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_details_optional_fields() {
        assert!(details().validate().is_ok());

        let mut d = details();
        d.contact_email = Some("not-an-email".to_string());
        assert!(d.validate().is_err());

        let mut d = details();
        d.support_url = Some("https://example.com/support".to_string());
        assert!(d.validate().is_ok());

        let mut d = details();
        d.site_name = String::new();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_password_policy() {
        let s = security();
        assert!(s.password_violations("Password123").is_empty());
        assert_eq!(s.password_violations("password123").len(), 1);
        assert_eq!(s.password_violations("Pw1").len(), 1);

        let mut s = security();
        s.password_requires_symbols = true;
        assert_eq!(s.password_violations("Password123").len(), 1);
        assert!(s.password_violations("Password123!").is_empty());
    }

    #[test]
    fn test_auth_layout_names() {
        let value = serde_json::to_value(AuthLayout::Split).unwrap();
        assert_eq!(value, "split");
        assert!(serde_json::from_value::<AuthLayout>("grid".into()).is_err());
        assert_eq!(AuthLayout::available().len(), 3);
    }
}
