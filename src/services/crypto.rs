use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, OsRng},
};
use base64::{
    Engine as _,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use rand::RngCore;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::AppError;

const NONCE_LEN: usize = 12;

/// 復号失敗（改ざん・鍵不一致・形式不正）
#[derive(Debug, thiserror::Error)]
#[error("復号に失敗しました")]
pub struct DecryptError;

/// AES-256-GCM による認証付き暗号化
///
/// # Security
/// - 暗号文は 96ビットnonce + 暗号文 + 16バイトtag
/// - 改ざんされたデータは必ず復号に失敗する
#[derive(Clone)]
pub struct Encrypter {
    key: [u8; 32],
}

impl Encrypter {
    /// Base64エンコードされた32バイトのキーから作成
    pub fn new(key_base64: &str) -> Result<Self, AppError> {
        let key_bytes = STANDARD.decode(key_base64).map_err(|e| {
            tracing::error!(error = ?e, "暗号化キーのBase64デコードエラー");
            AppError::Internal(anyhow::anyhow!("invalid encryption key format"))
        })?;

        if key_bytes.len() != 32 {
            tracing::error!(
                expected = 32,
                actual = key_bytes.len(),
                "暗号化キーの長さが不正"
            );
            return Err(AppError::Internal(anyhow::anyhow!(
                "encryption key must be 32 bytes"
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm, AppError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|e| {
            tracing::error!(error = ?e, "AES-GCM暗号化器の初期化エラー");
            AppError::Internal(anyhow::anyhow!("cipher initialization error"))
        })
    }

    /// 暗号化
    ///
    /// # Returns
    /// nonce (12バイト) + 暗号文
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AppError> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher.encrypt(nonce, plaintext).map_err(|e| {
            tracing::error!(error = ?e, "暗号化エラー");
            AppError::Internal(anyhow::anyhow!("encryption error"))
        })?;

        let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// 復号
    pub fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, DecryptError> {
        if encrypted.len() <= NONCE_LEN {
            return Err(DecryptError);
        }

        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|_| DecryptError)?;
        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_LEN);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| DecryptError)
    }

    /// 値をJSON化して暗号化し、URL-safe Base64 文字列にする
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, AppError> {
        let json = serde_json::to_vec(value).map_err(|e| {
            tracing::error!(error = ?e, "暗号化対象のシリアライズエラー");
            AppError::Internal(anyhow::anyhow!("serialization error"))
        })?;

        Ok(URL_SAFE_NO_PAD.encode(self.encrypt(&json)?))
    }

    /// `seal` の逆変換
    pub fn open<T: DeserializeOwned>(&self, sealed: &str) -> Result<T, DecryptError> {
        let encrypted = URL_SAFE_NO_PAD
            .decode(sealed.trim())
            .map_err(|_| DecryptError)?;
        let json = self.decrypt(&encrypted)?;
        serde_json::from_slice(&json).map_err(|_| DecryptError)
    }
}
