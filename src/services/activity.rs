use serde_json::Value;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::error::AppError;
use crate::repositories::ActivityRepository;
use crate::services::SettingsStore;

/// アクティビティログ
///
/// 有効/無効は `application_features.activity_log_enabled` に従う。
#[derive(Clone)]
pub struct ActivityLog {
    settings: SettingsStore,
}

impl ActivityLog {
    pub fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }

    /// 記録器を取得
    ///
    /// 設定の読み込みはトランザクション開始前に行うこと
    pub async fn recorder(&self) -> Result<ActivityRecorder, AppError> {
        Ok(ActivityRecorder {
            enabled: self.settings.activity_log_enabled().await?,
        })
    }
}

/// トランザクション内で使う記録器
#[derive(Debug, Clone, Copy)]
pub struct ActivityRecorder {
    enabled: bool,
}

impl ActivityRecorder {
    /// 変更と同じトランザクションで記録（無効時は何もしない）
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        causer_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        event: &str,
        properties: Value,
    ) -> Result<(), AppError> {
        if !self.enabled {
            return Ok(());
        }

        ActivityRepository::record(conn, causer_id, subject_id, event, &properties).await?;
        tracing::debug!(event, "アクティビティ記録");

        Ok(())
    }
}
