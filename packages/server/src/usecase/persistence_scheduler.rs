//! UseCase: ホワイトボードの遅延保存
//!
//! シーンの更新が続いている間は保存せず、最初の更新から一定時間後に
//! 「その時点の最新のシーン」を 1 回だけ保存します。
//!
//! ## 保存の流れ
//!
//! 1. 更新時（部屋のロック下）: タイマーが待機中でなければ張る
//! 2. 発火時: 部屋がまだ存在し、タイマーが取り消されていないことを確かめ、
//!    ロック下で最新のシーンを読み出してフラグを下ろす
//! 3. ロックを解放してから永続ストアに書き込む
//!
//! 同じ部屋の保存は `flush_lock` で直列化されるため、最後の即時保存が
//! 古い保存に上書きされることはありません。

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::sync::Mutex;

use crate::{
    domain::{PersistenceStore, RoomLifecycle, Scene, SpaceId, WhiteboardRoom},
    infrastructure::repository::SharedRoom,
};

/// 既定の遅延時間
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_secs(3);

/// 遅延保存のスケジューラ
pub struct PersistenceScheduler {
    store: Arc<dyn PersistenceStore>,
    debounce: Duration,
}

impl PersistenceScheduler {
    pub fn new(store: Arc<dyn PersistenceStore>, debounce: Duration) -> Self {
        Self { store, debounce }
    }

    /// 保存を予約する。新しくタイマーを張った場合は true
    ///
    /// 部屋のロックを保持した状態で呼ぶこと（`board` はそのガードの中身）。
    pub fn schedule(&self, room: &SharedRoom<WhiteboardRoom>, board: &mut WhiteboardRoom) -> bool {
        let weak = Arc::downgrade(room);
        let store = Arc::clone(&self.store);
        let debounce = self.debounce;

        let armed = board.arm_save(|generation| {
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                fire(weak, generation, store).await;
            })
            .abort_handle()
        });
        if armed {
            tracing::debug!(
                "Save of whiteboard '{}' scheduled in {:?}",
                board.id(),
                debounce
            );
        }
        armed
    }

    /// 待機中のタイマーを取り消し、現在のシーンを即座に保存する
    pub async fn flush_now(&self, room: &SharedRoom<WhiteboardRoom>) {
        let flush_lock = room.lock().await.flush_lock();
        let _flushing = flush_lock.lock().await;

        let (space_id, scene) = {
            let mut board = room.lock().await;
            if board.cancel_pending_save() {
                tracing::debug!("Pending save of whiteboard '{}' cancelled", board.id());
            }
            board.snapshot()
        };
        persist(self.store.as_ref(), space_id, &scene).await;
    }

    /// 部屋が空であれば閉鎖し、閉鎖した時点のシーンを保存する。閉鎖した場合は true
    ///
    /// 閉鎖とシーンの読み出しは同じロック区間で行う。閉鎖後に届いた更新は
    /// `deliver` で破棄されるため、受け付けた更新は必ずこの保存に含まれる。
    pub async fn close_and_flush(&self, room: &SharedRoom<WhiteboardRoom>) -> bool {
        let flush_lock = room.lock().await.flush_lock();
        let _flushing = flush_lock.lock().await;

        let (space_id, scene) = {
            let mut board = room.lock().await;
            if board.is_closed() || !board.is_empty() {
                return false;
            }
            // close は待機中のタイマーも取り消す
            board.close();
            board.snapshot()
        };
        persist(self.store.as_ref(), space_id, &scene).await;
        true
    }

    /// 保存が予約されている場合に限り即座に保存する。保存した場合は true
    pub async fn flush_if_scheduled(&self, room: &SharedRoom<WhiteboardRoom>) -> bool {
        if !room.lock().await.save_scheduled() {
            return false;
        }
        self.flush_now(room).await;
        true
    }
}

/// タイマー発火時の処理
async fn fire(
    room: Weak<Mutex<WhiteboardRoom>>,
    generation: u64,
    store: Arc<dyn PersistenceStore>,
) {
    // 待機中に部屋が破棄されていれば何もしない
    let Some(room) = room.upgrade() else {
        return;
    };

    let flush_lock = {
        let board = room.lock().await;
        if board.is_closed() {
            return;
        }
        board.flush_lock()
    };
    let _flushing = flush_lock.lock().await;

    let due = room.lock().await.take_due_save(generation);
    if let Some((space_id, scene)) = due {
        persist(store.as_ref(), space_id, &scene).await;
    }
}

/// 永続ストアに保存する（失敗はログに残して握りつぶす）
async fn persist(store: &dyn PersistenceStore, space_id: SpaceId, scene: &Scene) {
    if !space_id.is_durable() {
        tracing::debug!("Whiteboard has no durable space id, save skipped");
        return;
    }
    match store.save_whiteboard(space_id, scene).await {
        Ok(()) => tracing::info!("Whiteboard of space '{}' saved", space_id),
        Err(e) => tracing::error!("Failed to save whiteboard of space '{}': {}", space_id, e),
    }
}
