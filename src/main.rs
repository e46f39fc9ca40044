use std::net::SocketAddr;

use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use koami_auth::{
    config::Config,
    db,
    repositories::SettingsRepository,
    routes::create_router,
    services::{SettingsMigrator, email::run_delivery, settings_migrations::default_migrations},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ログ初期化（JSON形式、環境変数でレベル制御）
    init_tracing();

    tracing::info!("koami-auth 起動中...");

    // 設定読み込み
    let config = Config::load().map_err(|e| {
        tracing::error!(error = ?e, "設定の読み込みに失敗");
        anyhow::anyhow!("Failed to load config: {}", e)
    })?;

    tracing::info!(host = %config.host, port = %config.port, "設定読み込み完了");

    // サーバーアドレスを先に構築（config が move される前に）
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| {
            tracing::error!(error = ?e, "アドレスのパースに失敗");
            anyhow::anyhow!("Failed to parse address: {}", e)
        })?;

    // データベース接続 + スキーマ適用
    let db_pool = db::connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "データベース接続に失敗");
            anyhow::anyhow!("Failed to connect to database: {}", e)
        })?;

    tracing::info!("データベース接続完了");

    // 設定マイグレーション（未適用分のみ）
    SettingsMigrator::new(SettingsRepository::new(db_pool.clone()))
        .run(&default_migrations(&config))
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "設定マイグレーションに失敗");
            anyhow::anyhow!("Failed to run settings migrations: {}", e)
        })?;

    let admin = match (&config.admin_email, &config.admin_password) {
        (Some(email), Some(password)) => {
            Some((email.clone(), password.expose_secret().clone()))
        }
        _ => None,
    };

    // メール配送キュー
    let (mail_sender, mail_receiver) = mpsc::unbounded_channel();

    // AppState 構築
    let state = AppState::new(db_pool, config, mail_sender).map_err(|e| {
        tracing::error!(error = ?e, "AppState の構築に失敗");
        anyhow::anyhow!("Failed to create AppState: {}", e)
    })?;

    // 全設定グループが揃っていなければ起動しない
    state.settings.verify_groups().await.map_err(|e| {
        tracing::error!(error = ?e, "設定グループの検証に失敗");
        anyhow::anyhow!("Settings groups are incomplete: {}", e)
    })?;

    // 初期管理者
    if let Some((email, password)) = admin {
        state
            .auth_service
            .bootstrap_admin(&email, &password)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "初期管理者の作成に失敗");
                anyhow::anyhow!("Failed to bootstrap admin: {}", e)
            })?;
    }

    tokio::spawn(run_delivery(mail_receiver, state.config.clone()));

    // Router 構築
    let app = create_router(state);

    // サーバー起動
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(error = ?e, addr = %addr, "ポートのバインドに失敗");
        anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
    })?;

    tracing::info!(addr = %addr, "サーバー起動");

    // Graceful shutdown 対応
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, "サーバーエラー");
            anyhow::anyhow!("Server error: {}", e)
        })?;

    tracing::info!("サーバー終了");

    Ok(())
}

/// tracing の初期化（JSON形式）
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,koami_auth=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Graceful shutdown シグナル待機
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = ?e, "Ctrl+C ハンドラーのインストールに失敗");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = ?e, "SIGTERM ハンドラーのインストールに失敗");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("SIGTERM received, starting graceful shutdown");
        }
    }
}
