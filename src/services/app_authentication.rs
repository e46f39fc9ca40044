use data_encoding::BASE32;
use rand::RngCore;
use sqlx::SqliteConnection;
use totp_rs::{Algorithm, TOTP};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::User;
use crate::repositories::UserRepository;
use crate::services::crypto::Encrypter;
use crate::services::token::{alphanumeric, hash_token};

/// 認証アプリ（TOTP）プロバイダー
///
/// # Security
/// - シークレットはAES-256-GCMで暗号化してDB保存
/// - リカバリーコードはSHA256ハッシュのみ保存
/// - シークレット・コードの平文はログに出力しない
///
/// # Note
/// コード検証はステートレス。時間ウィンドウ内なら同じコードを複数回受け付ける。
#[derive(Clone)]
pub struct AppAuthentication {
    issuer: String,
    encrypter: Encrypter,
    recoverable: bool,
    recovery_code_count: usize,
}

impl AppAuthentication {
    /// 新しい AppAuthentication を作成
    ///
    /// # Arguments
    /// * `issuer` - TOTP発行者名（アプリ名）
    /// * `encrypter` - 保存用シークレットの暗号化器
    /// * `recoverable` - リカバリーコードを発行するか
    /// * `recovery_code_count` - 1セットあたりのリカバリーコード数
    pub fn new(
        issuer: String,
        encrypter: Encrypter,
        recoverable: bool,
        recovery_code_count: usize,
    ) -> Self {
        Self {
            issuer,
            encrypter,
            recoverable,
            recovery_code_count,
        }
    }

    /// 20バイトのランダムシークレットを生成し、Base32でエンコード
    pub fn generate_secret(&self) -> String {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32.encode(&bytes)
    }

    /// QRコードを data URI（PNG, Base64）で生成
    ///
    /// # Arguments
    /// * `email` - ユーザーのメールアドレス（アカウント識別子）
    /// * `secret` - Base32エンコードされたシークレット
    pub fn generate_qr_code_data_uri(&self, email: &str, secret: &str) -> Result<String, AppError> {
        let totp = self.create_totp(secret, Some(email))?;

        let qr_code = totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::Internal(anyhow::anyhow!("qr code generation error"))
        })?;

        Ok(format!("data:image/png;base64,{}", qr_code))
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    /// リカバリーコードを生成（`xxxxxxxxxx-xxxxxxxxxx` 形式）
    pub fn generate_recovery_codes(&self) -> Vec<String> {
        (0..self.recovery_code_count)
            .map(|_| format!("{}-{}", alphanumeric(10), alphanumeric(10)))
            .collect()
    }

    /// TOTPコードを検証
    ///
    /// # Note
    /// 前後1ステップの時間ウィンドウを許容（±30秒）
    pub fn verify_code(&self, code: &str, secret: &str) -> Result<bool, AppError> {
        // 入力検証: コードは6桁の数字のみ
        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }

        let totp = self.create_totp(secret, None)?;
        let current_time = unix_time()?;

        Ok(totp.check(code, current_time))
    }

    /// 現在のコードを生成
    pub fn current_code(&self, secret: &str) -> Result<String, AppError> {
        let totp = self.create_totp(secret, None)?;
        Ok(totp.generate(unix_time()?))
    }

    /// 登録を解除（シークレットとリカバリーコードを削除）
    pub async fn remove(&self, conn: &mut SqliteConnection, user_id: Uuid) -> Result<(), AppError> {
        UserRepository::clear_app_authentication(conn, user_id).await?;
        Ok(())
    }

    /// 未登録ユーザーにのみシークレットを保存
    ///
    /// # Returns
    /// 保存したか（同時に登録済みになっていれば false）
    pub async fn enroll_secret(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        secret: &str,
    ) -> Result<bool, AppError> {
        let encrypted = self.encrypter.encrypt(secret.as_bytes())?;
        Ok(UserRepository::claim_app_authentication_secret(conn, user_id, &encrypted).await?)
    }

    /// 登録済みユーザーのリカバリーコードのみ差し替え
    ///
    /// # Returns
    /// 差し替えたか（同時に無効化されていれば false）
    pub async fn replace_recovery_codes(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        codes: &[String],
    ) -> Result<bool, AppError> {
        let hashed = hash_recovery_codes(codes)?;
        Ok(UserRepository::replace_enrolled_recovery_codes(conn, user_id, &hashed).await?)
    }

    /// リカバリーコードをハッシュ化して保存（None で削除）
    pub async fn save_recovery_codes(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        codes: Option<&[String]>,
    ) -> Result<(), AppError> {
        let hashed = codes.map(hash_recovery_codes).transpose()?;

        UserRepository::save_app_authentication_recovery_codes(conn, user_id, hashed.as_deref())
            .await?;

        Ok(())
    }

    /// 保存済みシークレットを復号
    pub fn stored_secret(&self, user: &User) -> Result<Option<String>, AppError> {
        let Some(encrypted) = user.app_authentication_secret.as_deref() else {
            return Ok(None);
        };

        let plaintext = self.encrypter.decrypt(encrypted).map_err(|e| {
            tracing::error!(error = ?e, user_id = %user.id, "保存済みシークレットの復号エラー");
            AppError::Internal(anyhow::anyhow!("stored secret decryption error"))
        })?;

        String::from_utf8(plaintext).map(Some).map_err(|e| {
            tracing::error!(error = ?e, "復号データのUTF-8変換エラー");
            AppError::Internal(anyhow::anyhow!("invalid utf8 after decryption"))
        })
    }

    /// 有効化済みユーザーのコードを検証（ログイン時）
    pub fn verify_user_code(&self, user: &User, code: &str) -> Result<bool, AppError> {
        match self.stored_secret(user)? {
            Some(secret) => self.verify_code(code, &secret),
            None => Ok(false),
        }
    }

    /// リカバリーコードを1件消費
    ///
    /// 使用したコードは保存済みセットから取り除かれ、二度と通らない。
    pub async fn consume_recovery_code(
        &self,
        users: &UserRepository,
        user: &User,
        code: &str,
    ) -> Result<bool, AppError> {
        let Some(current_json) = user.app_authentication_recovery_codes.as_deref() else {
            return Ok(false);
        };
        let Some(hashes) = user.recovery_code_hashes()? else {
            return Ok(false);
        };

        let target = hash_token(code.trim());
        if !hashes.contains(&target) {
            return Ok(false);
        }

        let remaining: Vec<String> = hashes.into_iter().filter(|h| *h != target).collect();
        let remaining_json = serde_json::to_string(&remaining).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("recovery code serialization: {e}"))
        })?;

        // 同時に同じコードが使われた場合は片方のみ成功
        let swapped = users
            .swap_app_authentication_recovery_codes(user.id, current_json, &remaining_json)
            .await?;

        if swapped {
            tracing::info!(user_id = %user.id, remaining = remaining.len(), "リカバリーコード使用");
        }

        Ok(swapped)
    }

    /// TOTP オブジェクトを作成
    fn create_totp(&self, secret: &str, account: Option<&str>) -> Result<TOTP, AppError> {
        let secret_bytes = BASE32.decode(secret.as_bytes()).map_err(|e| {
            tracing::error!(error = ?e, "シークレットのBase32デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid base32 secret"))
        })?;

        TOTP::new(
            Algorithm::SHA1,
            6,  // 6桁
            1,  // skew: 前後1ステップ許容
            30, // period: 30秒
            secret_bytes,
            account.map(|_| self.issuer.clone()),
            account.unwrap_or_default().to_string(),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "TOTP作成エラー");
            AppError::Internal(anyhow::anyhow!("totp creation error"))
        })
    }
}

fn hash_recovery_codes(codes: &[String]) -> Result<String, AppError> {
    let hashed: Vec<String> = codes.iter().map(|code| hash_token(code)).collect();
    serde_json::to_string(&hashed)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("recovery code serialization: {e}")))
}

fn unix_time() -> Result<u64, AppError> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| {
            tracing::error!(error = ?e, "システム時刻取得エラー");
            AppError::Internal(anyhow::anyhow!("system time error"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    fn create_test_provider(recoverable: bool) -> AppAuthentication {
        let encrypter = Encrypter::new(&STANDARD.encode([0u8; 32])).unwrap();
        AppAuthentication::new("TestApp".to_string(), encrypter, recoverable, 8)
    }

    #[test]
    fn test_generate_secret() {
        let secret = create_test_provider(true).generate_secret();
        // Base32エンコードされた20バイト = 32文字
        assert_eq!(secret.len(), 32);
        assert!(
            secret
                .chars()
                .all(|c| "ABCDEFGHIJKLMNOPQRSTUVWXYZ234567".contains(c))
        );
    }

    #[test]
    fn test_generate_qr_code_data_uri() {
        let provider = create_test_provider(true);
        let secret = provider.generate_secret();

        let uri = provider
            .generate_qr_code_data_uri("test@example.com", &secret)
            .unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
        assert!(uri.len() > "data:image/png;base64,".len());
    }

    #[test]
    fn test_current_code_verifies() {
        let provider = create_test_provider(true);
        let secret = provider.generate_secret();
        let code = provider.current_code(&secret).unwrap();

        assert!(provider.verify_code(&code, &secret).unwrap());
        // 時間ウィンドウ内は再利用可能
        assert!(provider.verify_code(&code, &secret).unwrap());
        // 別シークレットでは通らない
        let other = provider.generate_secret();
        let other_code = provider.current_code(&other).unwrap();
        if other_code != code {
            assert!(!provider.verify_code(&other_code, &secret).unwrap());
        }
    }

    #[test]
    fn test_verify_invalid_code_format() {
        let provider = create_test_provider(true);
        let secret = provider.generate_secret();

        // 6桁でない
        assert!(!provider.verify_code("12345", &secret).unwrap());
        // 数字以外を含む
        assert!(!provider.verify_code("12345a", &secret).unwrap());
    }

    #[test]
    fn test_generate_recovery_codes() {
        let provider = create_test_provider(true);
        let codes = provider.generate_recovery_codes();
        assert_eq!(codes.len(), 8);
        for code in &codes {
            assert_eq!(code.len(), 21);
            assert_eq!(code.chars().nth(10), Some('-'));
        }
        assert_ne!(codes, provider.generate_recovery_codes());
        assert!(!create_test_provider(false).is_recoverable());
    }

    #[test]
    fn test_stored_secret_round_trip() {
        let provider = create_test_provider(true);
        let secret = provider.generate_secret();
        let mut user = crate::models::user::tests::sample_user(&[]);
        assert_eq!(provider.stored_secret(&user).unwrap(), None);

        user.app_authentication_secret = Some(provider.encrypter.encrypt(secret.as_bytes()).unwrap());
        assert_eq!(provider.stored_secret(&user).unwrap(), Some(secret.clone()));

        let code = provider.current_code(&secret).unwrap();
        assert!(provider.verify_user_code(&user, &code).unwrap());
    }
}
