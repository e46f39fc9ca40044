use serde_json::{Value, json};

use crate::config::Config;
use crate::error::AppError;
use crate::repositories::SettingsRepository;

/// 設定マイグレーション
///
/// `operations` は `"group.key"` と初期値の組。既存キーは上書きしない。
#[derive(Debug, Clone)]
pub struct SettingsMigration {
    pub name: &'static str,
    pub operations: Vec<(&'static str, Value)>,
}

/// 初期設定マイグレーション（名前の昇順で適用）
pub fn default_migrations(config: &Config) -> Vec<SettingsMigration> {
    vec![
        SettingsMigration {
            name: "2026_02_21_045713_create_application_details_settings",
            operations: vec![
                ("application_details.site_name", json!(config.app_name)),
                (
                    "application_details.site_description",
                    json!("A modern Laravel application starter kit"),
                ),
                ("application_details.site_logo_url", Value::Null),
                ("application_details.site_favicon_url", Value::Null),
                ("application_details.timezone", json!(config.app_timezone)),
                ("application_details.date_format", json!("Y-m-d")),
                ("application_details.time_format", json!("H:i:s")),
                ("application_details.contact_email", Value::Null),
                ("application_details.support_url", Value::Null),
            ],
        },
        SettingsMigration {
            name: "2026_02_21_045713_create_application_features_settings",
            operations: vec![
                ("application_features.registration_enabled", json!(true)),
                ("application_features.email_verification_required", json!(true)),
                (
                    "application_features.two_factor_authentication_enabled",
                    json!(true),
                ),
                ("application_features.password_reset_enabled", json!(true)),
                ("application_features.user_impersonation_enabled", json!(true)),
                ("application_features.default_user_role", json!("user")),
                ("application_features.activity_log_enabled", json!(true)),
                ("application_features.notifications_enabled", json!(true)),
            ],
        },
        SettingsMigration {
            name: "2026_02_21_045714_create_application_security_settings",
            operations: vec![
                ("application_security.password_min_length", json!(8)),
                ("application_security.password_requires_uppercase", json!(true)),
                ("application_security.password_requires_lowercase", json!(true)),
                ("application_security.password_requires_numbers", json!(true)),
                ("application_security.password_requires_symbols", json!(false)),
                ("application_security.session_lifetime", json!(120)),
                ("application_security.single_session", json!(false)),
                ("application_security.login_rate_limit", json!(5)),
                ("application_security.login_rate_limit_decay", json!(60)),
            ],
        },
        SettingsMigration {
            name: "2026_02_22_091500_add_auth_layout_to_application_features",
            operations: vec![("application_features.auth_layout", json!("simple"))],
        },
    ]
}

/// 設定マイグレーションの適用
#[derive(Clone)]
pub struct SettingsMigrator {
    repo: SettingsRepository,
}

impl SettingsMigrator {
    pub fn new(repo: SettingsRepository) -> Self {
        Self { repo }
    }

    /// 未適用のマイグレーションを順に適用
    ///
    /// # Returns
    /// 適用した件数
    ///
    /// # Errors
    /// 名前が厳密な昇順でない場合は何も適用せずに内部エラー
    pub async fn run(&self, migrations: &[SettingsMigration]) -> Result<usize, AppError> {
        ensure_ordered(migrations)?;

        let applied = self.repo.applied_migrations().await?;
        let mut count = 0;

        for migration in migrations {
            if applied.iter().any(|name| name == migration.name) {
                continue;
            }
            self.apply(migration).await?;
            count += 1;
        }

        tracing::info!(applied = count, "設定マイグレーション完了");

        Ok(count)
    }

    /// 1件のマイグレーションを適用（再適用しても既存値は変わらない）
    pub async fn apply(&self, migration: &SettingsMigration) -> Result<(), AppError> {
        let mut tx = self.repo.pool().begin().await?;

        for (path, default) in &migration.operations {
            let (group, name) = split_path(path)?;
            let created = SettingsRepository::insert_if_absent(&mut *tx, group, name, default).await?;
            if !created {
                tracing::debug!(group, name, "設定キーは既に存在（スキップ）");
            }
        }

        SettingsRepository::record_migration(&mut *tx, migration.name).await?;
        tx.commit().await?;

        tracing::info!(migration = migration.name, "設定マイグレーション適用");

        Ok(())
    }
}

fn split_path(path: &str) -> Result<(&str, &str), AppError> {
    match path.split_once('.') {
        Some((group, name)) if !group.is_empty() && !name.is_empty() => Ok((group, name)),
        _ => Err(AppError::Internal(anyhow::anyhow!(
            "invalid settings path: {path}"
        ))),
    }
}

fn ensure_ordered(migrations: &[SettingsMigration]) -> Result<(), AppError> {
    for pair in migrations.windows(2) {
        if pair[0].name >= pair[1].name {
            tracing::error!(
                previous = pair[0].name,
                next = pair[1].name,
                "設定マイグレーションの順序が不正"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "settings migrations out of order: {} >= {}",
                pair[0].name,
                pair[1].name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::from_pairs(vec![
            ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
            (
                "APP_KEY".to_string(),
                "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string(),
            ),
            ("APP_NAME".to_string(), "Koami".to_string()),
        ])
        .unwrap()
    }

    #[test]
    fn test_default_migrations_are_ordered() {
        let migrations = default_migrations(&test_config());
        assert!(ensure_ordered(&migrations).is_ok());
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut migrations = default_migrations(&test_config());
        migrations.swap(0, 2);
        assert!(ensure_ordered(&migrations).is_err());

        let duplicated = vec![migrations[0].clone(), migrations[0].clone()];
        assert!(ensure_ordered(&duplicated).is_err());
    }

    #[test]
    fn test_defaults_use_config() {
        let migrations = default_migrations(&test_config());
        let (_, site_name) = migrations[0]
            .operations
            .iter()
            .find(|(path, _)| *path == "application_details.site_name")
            .unwrap();
        assert_eq!(site_name, &json!("Koami"));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("a.b").unwrap(), ("a", "b"));
        assert!(split_path("nodot").is_err());
        assert!(split_path(".b").is_err());
    }
}
