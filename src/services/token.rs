use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore, distributions::Alphanumeric};
use sha2::{Digest, Sha256};

/// 32バイトのランダムトークンを生成（URL-safe Base64）
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// トークン・コードをSHA256でハッシュ化（16進文字列）
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// 指定桁数の数字コードを生成
pub fn numeric_code(digits: u32) -> String {
    let upper = 10u32.pow(digits);
    let value = rand::thread_rng().gen_range(0..upper);
    format!("{:0width$}", value, width = digits as usize)
}

/// 英数字のランダム文字列を生成
pub fn alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 43);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_stable() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[test]
    fn test_numeric_code_shape() {
        for _ in 0..50 {
            let code = numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_alphanumeric_shape() {
        let value = alphanumeric(10);
        assert_eq!(value.len(), 10);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
