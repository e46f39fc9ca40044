use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{AccountType, Role, User};

const USER_COLUMNS: &str = "id, name, email, email_verified_at, password_hash, account_type, \
     app_authentication_secret, app_authentication_recovery_codes, has_email_authentication, \
     created_at, updated_at";

/// 新規ユーザーの入力
#[derive(Debug)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub account_type: AccountType,
    pub email_verified_at: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// メールアドレスでユーザーを検索（ロール込み）
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        self.with_roles(user).await
    }

    /// ユーザーIDでユーザーを検索（ロール込み）
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        self.with_roles(user).await
    }

    async fn with_roles(&self, user: Option<User>) -> Result<Option<User>, sqlx::Error> {
        match user {
            Some(mut user) => {
                user.roles = self.roles_for(user.id).await?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// ユーザーのロール一覧
    pub async fn roles_for(&self, user_id: Uuid) -> Result<Vec<Role>, sqlx::Error> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        // 未知のロール名は認可に影響しないため読み飛ばす
        Ok(names.iter().filter_map(|name| name.parse().ok()).collect())
    }

    /// 新しいユーザーを作成
    ///
    /// # Errors
    /// - UNIQUE制約違反時: `sqlx::Error::Database`
    ///   呼び出し側で `AppError::EmailAlreadyExists` に変換すること
    pub async fn create_user(&self, new_user: NewUser<'_>) -> Result<User, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (id, name, email, email_verified_at, password_hash, account_type,
                               has_email_authentication, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(new_user.name)
        .bind(new_user.email)
        .bind(new_user.email_verified_at)
        .bind(new_user.password_hash)
        .bind(new_user.account_type.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await
    }

    /// ロールを付与（付与済みなら何もしない）
    pub async fn assign_role(&self, user_id: Uuid, role: Role) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // === MFA 状態（トランザクション内から呼び出す） ===

    /// シークレットとリカバリーコードを同時に削除
    pub async fn clear_app_authentication(
        conn: &mut SqliteConnection,
        user_id: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET app_authentication_secret = NULL,
                app_authentication_recovery_codes = NULL,
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 未登録の場合のみシークレットを保存
    ///
    /// # Returns
    /// 保存したか（既に登録済みなら false）
    pub async fn claim_app_authentication_secret(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        secret_encrypted: &[u8],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET app_authentication_secret = ?2, updated_at = ?3
            WHERE id = ?1 AND app_authentication_secret IS NULL
            "#,
        )
        .bind(user_id)
        .bind(secret_encrypted)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 登録済みの場合のみリカバリーコードを差し替え
    ///
    /// # Returns
    /// 差し替えたか（無効化済みなら false）
    pub async fn replace_enrolled_recovery_codes(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        recovery_codes_json: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET app_authentication_recovery_codes = ?2, updated_at = ?3
            WHERE id = ?1 AND app_authentication_secret IS NOT NULL
            "#,
        )
        .bind(user_id)
        .bind(recovery_codes_json)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// リカバリーコードハッシュ（JSON配列）を保存（None で削除）
    pub async fn save_app_authentication_recovery_codes(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        recovery_codes_json: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET app_authentication_recovery_codes = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .bind(recovery_codes_json)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// リカバリーコードを差し替え（読み取り時から変化していない場合のみ）
    ///
    /// # Returns
    /// 差し替えたか（同時使用などで変化していれば false）
    pub async fn swap_app_authentication_recovery_codes(
        &self,
        user_id: Uuid,
        expected_json: &str,
        replacement_json: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET app_authentication_recovery_codes = ?3, updated_at = ?4
            WHERE id = ?1 AND app_authentication_recovery_codes = ?2
            "#,
        )
        .bind(user_id)
        .bind(expected_json)
        .bind(replacement_json)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// メール認証フラグを切り替え
    pub async fn set_email_authentication(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET has_email_authentication = ?2, updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(user_id)
        .bind(enabled)
        .bind(OffsetDateTime::now_utc())
        .execute(conn)
        .await?;

        Ok(())
    }
}
