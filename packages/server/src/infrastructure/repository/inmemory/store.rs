//! InMemory PersistenceStore 実装
//!
//! データベースを使わない単一ノード構成とテストのための実装です。
//! ホワイトボードは Space ID をキーに upsert され、利用者はプログラムから登録します。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{PersistenceStore, Scene, SpaceId, StoreError, UserId, UserProfile};

/// インメモリ PersistenceStore 実装
#[derive(Default)]
pub struct InMemoryPersistenceStore {
    whiteboards: Mutex<HashMap<SpaceId, Scene>>,
    users: Mutex<HashMap<UserId, UserProfile>>,
    /// 保存呼び出しの履歴（呼び出し順）
    saves: Mutex<Vec<(SpaceId, Scene)>>,
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 利用者を登録（同じ ID は上書き）
    pub async fn insert_user(&self, profile: UserProfile) {
        let mut users = self.users.lock().await;
        users.insert(profile.id.clone(), profile);
    }

    /// ホワイトボードを直接登録（保存履歴には残らない）
    pub async fn insert_whiteboard(&self, space_id: SpaceId, scene: Scene) {
        let mut whiteboards = self.whiteboards.lock().await;
        whiteboards.insert(space_id, scene);
    }

    /// これまでの `save_whiteboard` 呼び出し
    pub async fn saves(&self) -> Vec<(SpaceId, Scene)> {
        self.saves.lock().await.clone()
    }

    /// 保存済みのホワイトボード件数
    pub async fn whiteboard_count(&self) -> usize {
        self.whiteboards.lock().await.len()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn load_whiteboard(&self, space_id: SpaceId) -> Result<Option<Scene>, StoreError> {
        let whiteboards = self.whiteboards.lock().await;
        Ok(whiteboards.get(&space_id).cloned())
    }

    async fn save_whiteboard(&self, space_id: SpaceId, scene: &Scene) -> Result<(), StoreError> {
        {
            let mut whiteboards = self.whiteboards.lock().await;
            whiteboards.insert(space_id, scene.clone());
        }
        self.saves.lock().await.push((space_id, scene.clone()));
        tracing::debug!("Whiteboard of space '{}' saved in memory", space_id);
        Ok(())
    }

    async fn lookup_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        let users = self.users.lock().await;
        Ok(users.get(user_id).cloned())
    }
}
