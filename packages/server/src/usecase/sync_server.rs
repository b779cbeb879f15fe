//! 部屋の種類ごとの同期サーバーが共有するインターフェース
//!
//! UI 層の WebSocket ハンドラはこの trait だけに依存し、
//! Presence / Whiteboard のどちらにも同じ接続ループを使います。

use async_trait::async_trait;

use crate::domain::{Connection, PersistenceStore, RoomId, UserId, UserProfile};

use super::error::ConnectError;

/// 同期サーバー trait
#[async_trait]
pub trait SyncServer: Send + Sync + 'static {
    /// 1 接続が部屋に参加している間の状態
    type Session: Send + Sync + 'static;

    /// ログ用の部屋の種類名
    fn kind(&self) -> &'static str;

    /// 上流の認証層が渡した利用者 ID から利用者情報を解決する
    async fn authenticate(&self, user_id: Option<&str>) -> Result<UserProfile, ConnectError>;

    /// 接続を部屋に参加させ、追いつき用の状態を送る
    async fn join(
        &self,
        room_id: RoomId,
        profile: UserProfile,
        connection: Connection,
    ) -> Self::Session;

    /// クライアントから受信したテキストメッセージを処理する
    async fn handle_inbound(&self, session: &Self::Session, payload: &str);

    /// 切断時の後始末
    async fn leave(&self, session: &Self::Session);
}

/// 利用者 ID を検証し、永続ストアから利用者情報を取得する
pub async fn resolve_user(
    store: &dyn PersistenceStore,
    user_id: Option<&str>,
) -> Result<UserProfile, ConnectError> {
    let raw = user_id.ok_or(ConnectError::MissingIdentity)?;
    let user_id = UserId::new(raw.to_string())?;
    store
        .lookup_user(&user_id)
        .await?
        .ok_or_else(|| ConnectError::UnknownUser(user_id.into_string()))
}

/// パスパラメータから部屋 ID を作る
pub fn parse_room_id(raw: String) -> Result<RoomId, ConnectError> {
    Ok(RoomId::new(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{MockPersistenceStore, PlayerStatus, StoreError},
        infrastructure::repository::InMemoryPersistenceStore,
    };

    #[tokio::test]
    async fn test_resolve_user_requires_identity() {
        // テスト項目: 利用者 ID が無い・空の場合は MissingIdentity になる
        // given (前提条件):
        let store = InMemoryPersistenceStore::new();

        // when (操作):
        let missing = resolve_user(&store, None).await;
        let blank = resolve_user(&store, Some("  ")).await;

        // then (期待する結果):
        assert_eq!(missing, Err(ConnectError::MissingIdentity));
        assert_eq!(blank, Err(ConnectError::MissingIdentity));
    }

    #[tokio::test]
    async fn test_resolve_user_rejects_unknown_user() {
        // テスト項目: 未登録の利用者は UnknownUser になる
        // given (前提条件):
        let store = InMemoryPersistenceStore::new();

        // when (操作):
        let result = resolve_user(&store, Some("404")).await;

        // then (期待する結果):
        assert_eq!(result, Err(ConnectError::UnknownUser("404".to_string())));
    }

    #[tokio::test]
    async fn test_resolve_user_returns_profile() {
        // テスト項目: 登録済みの利用者は利用者情報が返される
        // given (前提条件):
        let store = InMemoryPersistenceStore::new();
        let profile = UserProfile {
            id: UserId::new("1".to_string()).unwrap(),
            name: "Alice".to_string(),
            nickname: "alice".to_string(),
            status: PlayerStatus::Online,
        };
        store.insert_user(profile.clone()).await;

        // when (操作):
        let result = resolve_user(&store, Some("1")).await;

        // then (期待する結果):
        assert_eq!(result, Ok(profile));
    }

    #[tokio::test]
    async fn test_resolve_user_reports_store_failure() {
        // テスト項目: 永続ストアの障害は StoreUnavailable になる
        // given (前提条件):
        let mut store = MockPersistenceStore::new();
        store
            .expect_lookup_user()
            .returning(|_| Err(StoreError::Backend("connection refused".to_string())));

        // when (操作):
        let result = resolve_user(&store, Some("1")).await;

        // then (期待する結果):
        assert!(matches!(result, Err(ConnectError::StoreUnavailable(_))));
    }

    #[test]
    fn test_parse_room_id_rejects_invalid_values() {
        // テスト項目: 不正な部屋 ID は InvalidRoom になる
        // given (前提条件):
        let empty = String::new();
        let spaced = "room 42".to_string();

        // when (操作):
        let empty = parse_room_id(empty);
        let spaced = parse_room_id(spaced);

        // then (期待する結果):
        assert!(matches!(empty, Err(ConnectError::InvalidRoom(_))));
        assert!(matches!(spaced, Err(ConnectError::InvalidRoom(_))));
        assert!(parse_room_id("42".to_string()).is_ok());
    }
}
