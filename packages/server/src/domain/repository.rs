//! Repository trait 定義
//!
//! ドメイン層が必要とする永続ストアへのインターフェースを定義します。
//! 具体的な実装（InMemory / PostgreSQL）は Infrastructure 層が提供します。
//!
//! 永続化されるのはホワイトボードのシーンのみです。
//! 位置・在席・チャットはプロセス内にしか存在しません。

use async_trait::async_trait;

use super::{Scene, SpaceId, StoreError, UserId, UserProfile};

/// 永続ストア trait
///
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には依存しない。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Space のホワイトボードを取得（未保存なら `None`）
    async fn load_whiteboard(&self, space_id: SpaceId) -> Result<Option<Scene>, StoreError>;

    /// Space のホワイトボードを保存（Space ID をキーに upsert）
    async fn save_whiteboard(&self, space_id: SpaceId, scene: &Scene) -> Result<(), StoreError>;

    /// 利用者情報を取得（存在しなければ `None`）
    async fn lookup_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError>;
}
