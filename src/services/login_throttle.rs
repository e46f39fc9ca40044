use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::services::auth::normalize_email;

/// 期限切れキーをまとめて掃除する間隔
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// ログイン失敗のスライディングウィンドウ制限
///
/// キーは小文字化したメールアドレス。上限と窓は
/// `application_security.login_rate_limit(_decay)` から毎回渡される。
/// 窓を過ぎた失敗しか残っていないキーはマップから取り除く。
#[derive(Clone, Default)]
pub struct LoginThrottle {
    state: Arc<Mutex<ThrottleState>>,
}

struct ThrottleState {
    failures: HashMap<String, Vec<Instant>>,
    /// 直近の `check` で渡された窓
    window: Duration,
    last_sweep: Instant,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self {
            failures: HashMap::new(),
            window: Duration::ZERO,
            last_sweep: Instant::now(),
        }
    }
}

impl ThrottleState {
    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        let before = self.failures.len();
        self.failures.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < window);
            !entries.is_empty()
        });
        self.last_sweep = now;

        let removed = before - self.failures.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.failures.len(), "ログイン失敗履歴を掃除");
        }
    }

    fn sweep_if_due(&mut self, now: Instant) {
        if now.duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(now);
        }
    }
}

impl LoginThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 制限中なら再試行までの秒数を返す
    pub async fn check(&self, key: &str, max_attempts: usize, window: Duration) -> Option<u64> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.window = window;
        state.sweep_if_due(now);

        let key = normalize_email(key);
        let entries = state.failures.get_mut(&key)?;
        entries.retain(|t| now.duration_since(*t) < window);

        if entries.is_empty() {
            state.failures.remove(&key);
            return None;
        }
        if entries.len() < max_attempts {
            return None;
        }

        let oldest = entries.iter().min().copied()?;
        let remaining = window.saturating_sub(now.duration_since(oldest));
        Some(remaining.as_secs().max(1))
    }

    /// 失敗を記録
    pub async fn hit(&self, key: &str) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.sweep_if_due(now);
        state
            .failures
            .entry(normalize_email(key))
            .or_default()
            .push(now);
    }

    /// 成功時に履歴を消す
    pub async fn clear(&self, key: &str) {
        self.state
            .lock()
            .await
            .failures
            .remove(&normalize_email(key));
    }

    /// 窓を過ぎた失敗と空になったキーを取り除く
    pub async fn sweep(&self) {
        self.state.lock().await.sweep(Instant::now());
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.state.lock().await.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_blocks_after_limit() {
        let throttle = LoginThrottle::new();
        let window = Duration::from_secs(60);

        assert!(throttle.check("a@example.com", 2, window).await.is_none());
        throttle.hit("a@example.com").await;
        assert!(throttle.check("a@example.com", 2, window).await.is_none());
        throttle.hit("A@example.com ").await;

        let retry = throttle.check("a@example.com", 2, window).await;
        assert!(matches!(retry, Some(secs) if secs >= 1 && secs <= 60));
        // 別のキーは影響を受けない
        assert!(throttle.check("b@example.com", 2, window).await.is_none());
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let throttle = LoginThrottle::new();
        throttle.hit("a@example.com").await;
        throttle.clear("a@example.com").await;
        assert!(
            throttle
                .check("a@example.com", 1, Duration::from_secs(60))
                .await
                .is_none()
        );
        assert_eq!(throttle.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_expired_entries_ignored() {
        let throttle = LoginThrottle::new();
        throttle.hit("a@example.com").await;
        assert!(
            throttle
                .check("a@example.com", 1, Duration::from_millis(0))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_check_drops_expired_key() {
        let throttle = LoginThrottle::new();
        let window = Duration::from_millis(10);
        throttle.hit("a@example.com").await;
        assert_eq!(throttle.tracked_keys().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(throttle.check("a@example.com", 1, window).await.is_none());
        assert_eq!(throttle.tracked_keys().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_keys_never_checked_again() {
        let throttle = LoginThrottle::new();
        let window = Duration::from_millis(200);
        // 窓を記録させる
        assert!(throttle.check("x@example.com", 5, window).await.is_none());

        for i in 0..100 {
            throttle.hit(&format!("user{i}@example.com")).await;
        }
        assert_eq!(throttle.tracked_keys().await, 100);

        tokio::time::sleep(Duration::from_millis(300)).await;
        throttle.hit("fresh@example.com").await;
        throttle.sweep().await;

        // 窓内の失敗だけが残る
        assert_eq!(throttle.tracked_keys().await, 1);
        assert!(throttle.check("fresh@example.com", 1, window).await.is_some());
    }
}
