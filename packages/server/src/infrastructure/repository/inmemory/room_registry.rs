//! InMemory RoomRegistry 実装
//!
//! 部屋 ID から部屋の状態への対応表です。部屋は最初の参加時に遅延生成され、
//! 参加者がいなくなった時点で削除されます。
//!
//! ## ロックの規約
//!
//! - レジストリのロックはエントリ 1 件の追加・削除の間だけ保持する
//! - 部屋のロックを取る前に必ずレジストリのロックを解放する（入れ子にしない）
//! - 削除が確定した部屋は `close()` され、以後の参加者は新しい部屋を作り直す
//!
//! これにより「削除の瞬間に参加したクライアント」が消えた部屋に取り残されることはありません。

use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{RoomId, RoomLifecycle};

/// 共有される部屋
pub type SharedRoom<R> = Arc<Mutex<R>>;

/// 部屋のレジストリ
pub struct RoomRegistry<R> {
    rooms: Mutex<HashMap<RoomId, SharedRoom<R>>>,
}

impl<R: RoomLifecycle> RoomRegistry<R> {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// 読み取り専用の参照（バスからの配信経路で使う）
    pub async fn get(&self, id: &RoomId) -> Option<SharedRoom<R>> {
        let rooms = self.rooms.lock().await;
        rooms.get(id).cloned()
    }

    /// 部屋が無ければ登録し、登録されている方の部屋を返す
    async fn insert_if_absent(&self, id: RoomId, room: SharedRoom<R>) -> SharedRoom<R> {
        let mut rooms = self.rooms.lock().await;
        let entry = rooms.entry(id).or_insert(room);
        Arc::clone(entry)
    }

    /// 登録されている部屋が `room` と同一の場合に限り削除する
    pub async fn remove_if_same(&self, id: &RoomId, room: &SharedRoom<R>) -> bool {
        let mut rooms = self.rooms.lock().await;
        match rooms.get(id) {
            Some(current) if Arc::ptr_eq(current, room) => {
                rooms.remove(id);
                tracing::info!("Room '{}' removed from registry", id);
                true
            }
            _ => false,
        }
    }

    /// 部屋に入る（無ければ `make` で生成する）
    ///
    /// 部屋のロックを保持したまま返すため、呼び出し側は参加者の登録と
    /// スナップショットの取得を 1 つのロック区間で行えます。
    /// `make` はレジストリのロックの外で呼ばれます（永続ストアからの読み込みを含むため）。
    pub async fn enter<F, Fut>(&self, id: &RoomId, make: F) -> (SharedRoom<R>, OwnedMutexGuard<R>)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = R>,
    {
        loop {
            let room = match self.get(id).await {
                Some(room) => room,
                None => {
                    let fresh = Arc::new(Mutex::new(make().await));
                    let installed = self.insert_if_absent(id.clone(), Arc::clone(&fresh)).await;
                    if Arc::ptr_eq(&installed, &fresh) {
                        tracing::info!("Room '{}' created", id);
                    }
                    installed
                }
            };

            let guard = Arc::clone(&room).lock_owned().await;
            if guard.is_closed() {
                // 削除が確定した部屋。登録が残っていれば外して作り直す
                drop(guard);
                self.remove_if_same(id, &room).await;
                continue;
            }
            return (room, guard);
        }
    }

    /// 部屋が空なら閉鎖してレジストリから外す。外した場合は true
    pub async fn retire_if_empty(&self, id: &RoomId, room: &SharedRoom<R>) -> bool {
        {
            let mut guard = room.lock().await;
            if guard.is_closed() {
                return false;
            }
            if !guard.is_empty() {
                return false;
            }
            guard.close();
        }
        self.remove_if_same(id, room).await;
        true
    }

    /// 登録されている全ての部屋
    pub async fn rooms(&self) -> Vec<(RoomId, SharedRoom<R>)> {
        let rooms = self.rooms.lock().await;
        rooms
            .iter()
            .map(|(id, room)| (id.clone(), Arc::clone(room)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.lock().await.is_empty()
    }
}

impl<R: RoomLifecycle> Default for RoomRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}
