use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// ベアラートークンで識別されるログインセッション
///
/// なりすまし中は `user_id` が対象ユーザー、`impersonator_id` が元の管理者になる
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub token_hash: String,
    pub user_id: Uuid,
    pub impersonator_id: Option<Uuid>,
    /// UNIX秒
    pub expires_at: i64,
    pub created_at: OffsetDateTime,
}

impl Session {
    pub fn is_impersonating(&self) -> bool {
        self.impersonator_id.is_some()
    }
}
