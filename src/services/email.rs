use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::AppError;

/// 送信待ちメール
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// メール送信サービス
///
/// 送信はキュー（チャネル）に積むだけで、配送は `run_delivery` が担当する。
#[derive(Clone)]
pub struct EmailService {
    sender: mpsc::UnboundedSender<OutgoingMail>,
}

impl EmailService {
    /// 新しい EmailService を作成
    pub fn new(sender: mpsc::UnboundedSender<OutgoingMail>) -> Self {
        Self { sender }
    }

    /// メール認証コードを送信
    ///
    /// # Security
    /// コードはログに出力しない
    pub fn send_email_authentication_code(
        &self,
        to: &str,
        code: &str,
        valid_minutes: i64,
    ) -> Result<(), AppError> {
        let mail = OutgoingMail {
            to: to.to_string(),
            subject: "メール認証コード".to_string(),
            body: format!(
                "認証コード: {code}\n\nこのコードの有効期限は{valid_minutes}分です。\
                 心当たりがない場合はこのメールを破棄してください。"
            ),
        };

        self.sender.send(mail).map_err(|e| {
            tracing::error!(error = %e, "メール送信キューが閉じています");
            AppError::Internal(anyhow::anyhow!("mail queue closed"))
        })
    }
}

/// メール配送ループ
///
/// SMTP が設定されていれば送信し、未設定（開発環境）ならログ出力のみ。
pub async fn run_delivery(mut receiver: mpsc::UnboundedReceiver<OutgoingMail>, config: Arc<Config>) {
    while let Some(mail) = receiver.recv().await {
        if config.smtp_configured() {
            if let Err(e) = deliver_smtp(&config, &mail).await {
                tracing::error!(error = ?e, to = %mail.to, "メール送信失敗");
            } else {
                tracing::info!(to = %mail.to, "メール送信完了");
            }
        } else {
            // 開発モード: 本文（コード）は出力しない
            tracing::info!(to = %mail.to, subject = %mail.subject, "メール送信（開発モード）");
        }
    }

    tracing::info!("メール配送ループ終了");
}

#[cfg(feature = "email")]
async fn deliver_smtp(config: &Config, mail: &OutgoingMail) -> anyhow::Result<()> {
    use lettre::{
        AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        transport::smtp::authentication::Credentials,
    };
    use secrecy::ExposeSecret;

    let host = config
        .smtp_host
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("SMTP_HOST is not set"))?;
    let from = config
        .mail_from_address
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("MAIL_FROM_ADDRESS is not set"))?;

    let message = Message::builder()
        .from(from.parse()?)
        .to(mail.to.parse()?)
        .subject(mail.subject.clone())
        .body(mail.body.clone())?;

    let mut builder =
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(config.smtp_port);
    if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
        builder = builder.credentials(Credentials::new(
            username.expose_secret().clone(),
            password.expose_secret().clone(),
        ));
    }

    builder.build().send(message).await?;
    Ok(())
}

#[cfg(not(feature = "email"))]
async fn deliver_smtp(_config: &Config, mail: &OutgoingMail) -> anyhow::Result<()> {
    tracing::warn!(to = %mail.to, "email 機能が無効のため SMTP 送信をスキップ");
    Ok(())
}
