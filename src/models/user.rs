use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;

/// 認可ロジックが意味を持つロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Self::SuperAdmin),
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// ユーザーが実装する認証機能
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    AppAuthentication,
    AppAuthenticationRecovery,
    EmailAuthentication,
    MustVerifyEmail,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppAuthentication => "app_authentication",
            Self::AppAuthenticationRecovery => "app_authentication_recovery",
            Self::EmailAuthentication => "email_authentication",
            Self::MustVerifyEmail => "must_verify_email",
        }
    }
}

/// アカウント種別
///
/// 種別ごとに持つ機能が固定される。service はAPI専用で MFA を持たない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Standard,
    Service,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Service => "service",
        }
    }

    pub fn has(&self, capability: Capability) -> bool {
        match (self, capability) {
            (Self::Standard, _) => true,
            (Self::Service, _) => false,
        }
    }
}

impl TryFrom<String> for AccountType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "standard" => Ok(Self::Standard),
            "service" => Ok(Self::Service),
            other => Err(format!("unknown account type: {other}")),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub email_verified_at: Option<OffsetDateTime>,
    #[serde(skip)]
    pub password_hash: Option<String>,
    #[sqlx(try_from = "String")]
    pub account_type: AccountType,
    /// AES-256-GCM で暗号化された TOTP シークレット
    #[serde(skip)]
    pub app_authentication_secret: Option<Vec<u8>>,
    /// リカバリーコードのハッシュ（JSON配列）
    #[serde(skip)]
    pub app_authentication_recovery_codes: Option<String>,
    pub has_email_authentication: bool,
    #[sqlx(skip)]
    pub roles: Vec<Role>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_verified_email(&self) -> bool {
        self.email_verified_at.is_some()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.account_type.has(capability)
    }

    /// 必要な機能を持たない場合は構成不整合として扱う
    pub fn require(&self, capability: Capability) -> Result<(), AppError> {
        if self.has_capability(capability) {
            Ok(())
        } else {
            Err(AppError::MissingCapability(capability.as_str()))
        }
    }

    pub fn has_app_authentication(&self) -> bool {
        self.app_authentication_secret.is_some()
    }

    /// 保存済みリカバリーコードハッシュを取り出す
    pub fn recovery_code_hashes(&self) -> Result<Option<Vec<String>>, AppError> {
        self.app_authentication_recovery_codes
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| {
                tracing::error!(error = ?e, user_id = %self.id, "リカバリーコードのデコードエラー");
                AppError::Internal(anyhow::anyhow!("invalid recovery codes column"))
            })
    }
}
