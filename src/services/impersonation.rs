use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ApplicationFeaturesSettings, Role, Session, User};
use crate::repositories::{SessionRepository, UserRepository};
use crate::services::SettingsStore;
use crate::services::activity::ActivityLog;

/// 管理パネルに入れるか
pub fn can_access_panel(user: &User) -> bool {
    user.has_role(Role::SuperAdmin)
}

/// なりすましを実行できるか
pub fn can_impersonate(actor: &User) -> bool {
    actor.has_role(Role::Admin)
}

/// なりすましの対象にできるか（管理者同士は不可）
pub fn can_be_impersonated(target: &User) -> bool {
    !target.has_role(Role::Admin)
}

/// なりすまし開始後の遷移先（判定対象はなりすまし後のユーザー）
pub fn take_redirect(acting: &User) -> &'static str {
    if acting.has_role(Role::Admin) {
        "/admin"
    } else {
        "/dashboard"
    }
}

/// なりすまし終了後の遷移先（判定対象は元の管理者）
pub fn leave_redirect(acting: &User) -> &'static str {
    if acting.has_role(Role::Admin) {
        "/admin"
    } else {
        "/"
    }
}

/// なりすましサービス
///
/// セッションの `user_id` を対象ユーザーに差し替え、元の管理者を
/// `impersonator_id` に退避する。
#[derive(Clone)]
pub struct ImpersonationService {
    pool: SqlitePool,
    users: UserRepository,
    settings: SettingsStore,
    activity: ActivityLog,
}

impl ImpersonationService {
    pub fn new(
        pool: SqlitePool,
        users: UserRepository,
        settings: SettingsStore,
        activity: ActivityLog,
    ) -> Self {
        Self {
            pool,
            users,
            settings,
            activity,
        }
    }

    /// なりすまし開始
    ///
    /// # Returns
    /// 遷移先
    pub async fn take(
        &self,
        session: &Session,
        actor: &User,
        target_id: Uuid,
    ) -> Result<&'static str, AppError> {
        let features = self.settings.load::<ApplicationFeaturesSettings>().await?;
        if !features.user_impersonation_enabled {
            return Err(AppError::NotFound);
        }

        if session.is_impersonating() || !can_impersonate(actor) {
            tracing::warn!(actor_id = %actor.id, "なりすまし拒否: 権限なし");
            return Err(AppError::Forbidden);
        }

        let target = self
            .users
            .find_by_id(target_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if target.id == actor.id || !can_be_impersonated(&target) {
            tracing::warn!(actor_id = %actor.id, target_id = %target.id, "なりすまし拒否: 対象外");
            return Err(AppError::Forbidden);
        }

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        if !SessionRepository::start_impersonation(&mut tx, session.id, target.id).await? {
            // 同じセッションで並行して開始された
            return Err(AppError::Forbidden);
        }
        recorder
            .record(
                &mut tx,
                Some(actor.id),
                Some(target.id),
                "impersonation.started",
                json!({ "session_id": session.id }),
            )
            .await?;
        tx.commit().await?;

        tracing::info!(actor_id = %actor.id, target_id = %target.id, "なりすまし開始");

        Ok(take_redirect(&target))
    }

    /// なりすまし終了
    ///
    /// # Returns
    /// 遷移先
    pub async fn leave(&self, session: &Session) -> Result<&'static str, AppError> {
        let Some(impersonator_id) = session.impersonator_id else {
            return Err(AppError::Forbidden);
        };

        let recorder = self.activity.recorder().await?;
        let mut tx = self.pool.begin().await?;
        if !SessionRepository::stop_impersonation(&mut tx, session.id).await? {
            return Err(AppError::Forbidden);
        }
        recorder
            .record(
                &mut tx,
                Some(impersonator_id),
                Some(session.user_id),
                "impersonation.stopped",
                json!({ "session_id": session.id }),
            )
            .await?;
        tx.commit().await?;

        let admin = self
            .users
            .find_by_id(impersonator_id)
            .await?
            .ok_or(AppError::NotFound)?;

        tracing::info!(actor_id = %admin.id, target_id = %session.user_id, "なりすまし終了");

        Ok(leave_redirect(&admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::tests::sample_user;

    #[test]
    fn test_only_admins_impersonate() {
        assert!(can_impersonate(&sample_user(&[Role::Admin])));
        assert!(can_impersonate(&sample_user(&[Role::Admin, Role::SuperAdmin])));
        assert!(!can_impersonate(&sample_user(&[Role::SuperAdmin])));
        assert!(!can_impersonate(&sample_user(&[Role::User])));
        assert!(!can_impersonate(&sample_user(&[])));
    }

    #[test]
    fn test_admins_cannot_be_impersonated() {
        assert!(!can_be_impersonated(&sample_user(&[Role::Admin])));
        assert!(!can_be_impersonated(&sample_user(&[Role::User, Role::Admin])));
        assert!(can_be_impersonated(&sample_user(&[Role::User])));
        assert!(can_be_impersonated(&sample_user(&[Role::SuperAdmin])));
    }

    #[test]
    fn test_panel_access_is_super_admin_only() {
        assert!(can_access_panel(&sample_user(&[Role::SuperAdmin])));
        assert!(!can_access_panel(&sample_user(&[Role::Admin])));
    }

    #[test]
    fn test_redirects_follow_acting_identity() {
        let admin = sample_user(&[Role::Admin]);
        let user = sample_user(&[Role::User]);

        assert_eq!(take_redirect(&user), "/dashboard");
        assert_eq!(take_redirect(&admin), "/admin");
        assert_eq!(leave_redirect(&admin), "/admin");
        assert_eq!(leave_redirect(&user), "/");
    }
}
