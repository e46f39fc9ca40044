use std::collections::HashMap;
use std::sync::Arc;

use garde::Validate;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    ApplicationDetailsSettings, ApplicationFeaturesSettings, ApplicationSecuritySettings,
    SettingsGroup,
};
use crate::repositories::{ActivityRepository, SettingsRepository};

/// 型付き設定ストア
///
/// 読み取りはグループ単位でキャッシュされ、次の書き込みまで同じ値を返す。
/// 書き込みはグループ全体を検証してから1トランザクションで行う。
#[derive(Clone)]
pub struct SettingsStore {
    repo: SettingsRepository,
    cache: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
}

impl SettingsStore {
    pub fn new(repo: SettingsRepository) -> Self {
        Self {
            repo,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// グループの生データ（キャッシュ優先）
    async fn payload(&self, group: &str) -> Result<Map<String, Value>, AppError> {
        if let Some(payload) = self.cache.read().await.get(group) {
            return Ok(payload.clone());
        }

        // 書き込みと同じロックで読み込むため、古い値がキャッシュに入ることはない
        let mut cache = self.cache.write().await;
        if let Some(payload) = cache.get(group) {
            return Ok(payload.clone());
        }

        let payload = self.repo.load_group(group).await?;
        cache.insert(group.to_string(), payload.clone());

        Ok(payload)
    }

    /// 型付きでグループを読み込む
    ///
    /// 宣言済みキーが欠けている場合はマイグレーション未適用として内部エラー
    pub async fn load<G: SettingsGroup>(&self) -> Result<G, AppError> {
        let payload = self.payload(G::GROUP).await?;

        serde_json::from_value(Value::Object(payload)).map_err(|e| {
            tracing::error!(error = %e, group = G::GROUP, "設定グループが不完全");
            AppError::Internal(anyhow::anyhow!("settings group {} is incomplete", G::GROUP))
        })
    }

    /// 送信されたJSONをグループ型に変換
    ///
    /// 変換できない場合は、現在値に1項目ずつ当てはめて原因のキーを特定する
    pub async fn parse_group<G: SettingsGroup>(&self, body: Value) -> Result<G, AppError> {
        let Value::Object(submitted) = body else {
            return Err(AppError::validation("body", "リクエスト本文が正しくありません"));
        };

        if let Ok(settings) = serde_json::from_value::<G>(Value::Object(submitted.clone())) {
            return Ok(settings);
        }

        let current = self.payload(G::GROUP).await?;
        let mut errors = Vec::new();
        for key in current.keys() {
            let mut candidate = current.clone();
            let message = match submitted.get(key) {
                Some(value) => {
                    candidate.insert(key.clone(), value.clone());
                    "値の型が正しくありません"
                }
                None => {
                    candidate.remove(key);
                    "必須項目です"
                }
            };
            if serde_json::from_value::<G>(Value::Object(candidate)).is_err() {
                errors.push((key.clone(), message.to_string()));
            }
        }

        if errors.is_empty() {
            return Err(AppError::validation("body", "リクエスト本文が正しくありません"));
        }

        tracing::debug!(group = G::GROUP, fields = errors.len(), "設定ページの入力エラー");
        Err(AppError::ValidationReport(errors))
    }

    /// グループ全体を検証して保存
    ///
    /// 検証エラー時は何も書き込まない
    pub async fn save<G: SettingsGroup>(
        &self,
        settings: &G,
        causer_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        settings.validate().map_err(report_to_error)?;

        let payload = match serde_json::to_value(settings) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(AppError::Internal(anyhow::anyhow!(
                    "settings group {} is not an object",
                    G::GROUP
                )));
            }
        };

        let log_activity = self.activity_log_enabled().await?;
        let mut cache = self.cache.write().await;
        self.write(&mut cache, G::GROUP, payload, causer_id, log_activity)
            .await
    }

    /// 単一キーの値を取得
    pub async fn get(&self, group: &str, key: &str) -> Result<Value, AppError> {
        ensure_known_group(group)?;
        self.payload(group)
            .await?
            .get(key)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    /// 単一キーの値を更新
    ///
    /// 型と範囲はグループ全体として検証する
    pub async fn set(
        &self,
        group: &str,
        key: &str,
        value: Value,
        causer_id: Option<Uuid>,
    ) -> Result<(), AppError> {
        ensure_known_group(group)?;
        let log_activity = self.activity_log_enabled().await?;

        // 読み取りから書き込みまで同じロックを保持する
        let mut cache = self.cache.write().await;
        let mut payload = match cache.get(group) {
            Some(payload) => payload.clone(),
            None => self.repo.load_group(group).await?,
        };
        if !payload.contains_key(key) {
            return Err(AppError::NotFound);
        }
        payload.insert(key.to_string(), value);

        let payload = match group {
            ApplicationDetailsSettings::GROUP => {
                normalize::<ApplicationDetailsSettings>(payload, key)?
            }
            ApplicationFeaturesSettings::GROUP => {
                normalize::<ApplicationFeaturesSettings>(payload, key)?
            }
            ApplicationSecuritySettings::GROUP => {
                normalize::<ApplicationSecuritySettings>(payload, key)?
            }
            _ => return Err(AppError::NotFound),
        };

        self.write(&mut cache, group, payload, causer_id, log_activity)
            .await
    }

    /// 全グループが宣言どおりに揃っているか確認
    pub async fn verify_groups(&self) -> Result<(), AppError> {
        self.load::<ApplicationDetailsSettings>().await?;
        self.load::<ApplicationFeaturesSettings>().await?;
        self.load::<ApplicationSecuritySettings>().await?;
        Ok(())
    }

    /// アクティビティログが有効か
    pub async fn activity_log_enabled(&self) -> Result<bool, AppError> {
        Ok(self
            .load::<ApplicationFeaturesSettings>()
            .await?
            .activity_log_enabled)
    }

    /// キャッシュを破棄（マイグレーション適用後など）
    pub async fn invalidate(&self) {
        self.cache.write().await.clear();
    }

    async fn write(
        &self,
        cache: &mut HashMap<String, Map<String, Value>>,
        group: &str,
        payload: Map<String, Value>,
        causer_id: Option<Uuid>,
        log_activity: bool,
    ) -> Result<(), AppError> {
        let mut tx = self.repo.pool().begin().await?;

        for (name, value) in &payload {
            SettingsRepository::upsert(&mut *tx, group, name, value).await?;
        }

        if log_activity {
            let keys: Vec<&String> = payload.keys().collect();
            ActivityRepository::record(
                &mut *tx,
                causer_id,
                None,
                "settings.updated",
                &json!({ "group": group, "keys": keys }),
            )
            .await?;
        }

        tx.commit().await?;
        cache.insert(group.to_string(), payload);

        tracing::info!(group, causer_id = ?causer_id, "設定を保存");

        Ok(())
    }
}

fn ensure_known_group(group: &str) -> Result<(), AppError> {
    match group {
        ApplicationDetailsSettings::GROUP
        | ApplicationFeaturesSettings::GROUP
        | ApplicationSecuritySettings::GROUP => Ok(()),
        _ => Err(AppError::NotFound),
    }
}

/// 型に通して検証し、正規化したJSONに戻す
fn normalize<G: SettingsGroup>(
    payload: Map<String, Value>,
    key: &str,
) -> Result<Map<String, Value>, AppError> {
    let settings: G = serde_json::from_value(Value::Object(payload))
        .map_err(|_| AppError::validation(key, "値の型が正しくありません"))?;
    settings.validate().map_err(report_to_error)?;

    match serde_json::to_value(&settings) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(AppError::Internal(anyhow::anyhow!(
            "settings group {} is not an object",
            G::GROUP
        ))),
    }
}

/// garde のレポートをフィールド別エラーに変換
pub fn report_to_error(report: garde::Report) -> AppError {
    AppError::ValidationReport(
        report
            .iter()
            .map(|(path, error)| (path.to_string(), error.message().to_string()))
            .collect(),
    )
}
