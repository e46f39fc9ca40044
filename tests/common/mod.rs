#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tower::ServiceExt;

use koami_auth::config::Config;
use koami_auth::db;
use koami_auth::models::{AccountType, Role, User};
use koami_auth::repositories::{NewUser, SettingsRepository};
use koami_auth::routes::create_router;
use koami_auth::services::email::OutgoingMail;
use koami_auth::services::settings_migrations::default_migrations;
use koami_auth::services::SettingsMigrator;
use koami_auth::state::AppState;

pub const TEST_APP_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
pub const TEST_PASSWORD: &str = "Password123";

pub struct TestApp {
    pub state: AppState,
    pub mail: mpsc::UnboundedReceiver<OutgoingMail>,
}

pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut pairs = vec![
        ("DATABASE_URL".to_string(), "sqlite::memory:".to_string()),
        ("APP_KEY".to_string(), TEST_APP_KEY.to_string()),
        ("APP_NAME".to_string(), "Koami".to_string()),
    ];
    pairs.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    Config::from_pairs(pairs).unwrap()
}

/// インメモリDB + 設定マイグレーション適用済みのアプリ
pub async fn spawn_app(extra: &[(&str, &str)]) -> TestApp {
    let config = test_config(extra);
    let pool = db::connect("sqlite::memory:").await.unwrap();

    SettingsMigrator::new(SettingsRepository::new(pool.clone()))
        .run(&default_migrations(&config))
        .await
        .unwrap();

    let (sender, mail) = mpsc::unbounded_channel();
    let state = AppState::new(pool, config, sender).unwrap();
    state.settings.verify_groups().await.unwrap();

    TestApp { state, mail }
}

impl TestApp {
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// パスワード付きのユーザーを作成
    pub async fn create_user(&self, email: &str, roles: &[Role], verified: bool) -> User {
        let password_hash = koami_auth::services::auth::hash_password(TEST_PASSWORD).unwrap();
        let user = self
            .state
            .user_repo
            .create_user(NewUser {
                name: "Test User",
                email,
                password_hash: Some(&password_hash),
                account_type: AccountType::Standard,
                email_verified_at: verified.then(OffsetDateTime::now_utc),
            })
            .await
            .unwrap();

        for role in roles {
            self.state.user_repo.assign_role(user.id, *role).await.unwrap();
        }

        self.reload(&user).await
    }

    pub async fn create_service_account(&self, email: &str) -> User {
        let user = self
            .state
            .user_repo
            .create_user(NewUser {
                name: "Service",
                email,
                password_hash: None,
                account_type: AccountType::Service,
                email_verified_at: Some(OffsetDateTime::now_utc()),
            })
            .await
            .unwrap();
        self.reload(&user).await
    }

    pub async fn reload(&self, user: &User) -> User {
        self.state
            .user_repo
            .find_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
    }

    /// ベアラートークンを発行
    pub async fn token_for(&self, user: &User) -> String {
        self.state
            .auth_service
            .issue_session(user)
            .await
            .unwrap()
            .token
    }

    /// 送信キューから最新のメール認証コードを取り出す
    pub fn take_mailed_code(&mut self) -> Option<String> {
        let mut code = None;
        while let Ok(mail) = self.mail.try_recv() {
            code = extract_code(&mail.body);
        }
        code
    }

    pub fn mailed_count(&mut self) -> usize {
        let mut count = 0;
        while self.mail.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        (status, headers, json)
    }
}

fn extract_code(body: &str) -> Option<String> {
    let start = body.find("認証コード: ")? + "認証コード: ".len();
    let code: String = body[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (code.len() == 6).then_some(code)
}
