//! PostgreSQL PersistenceStore 実装
//!
//! テーブルは既に存在するものとして扱います（スキーマ管理はこのサービスの責務外）。
//!
//! ```text
//! space_whiteboards(space_id UNIQUE, elements JSONB, app_state JSONB,
//!                   created_at, updated_at, deleted_at)
//! users(id, name, nickname, status, deleted_at)
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};

use crate::domain::{PersistenceStore, PlayerStatus, Scene, SpaceId, StoreError, UserId, UserProfile};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(e.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// PostgreSQL PersistenceStore 実装
#[derive(Clone)]
pub struct PgPersistenceStore {
    pool: PgPool,
}

impl PgPersistenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 接続プールを作成して接続する
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;
        tracing::info!(
            "Connected to PostgreSQL (max_connections: {})",
            max_connections
        );
        Ok(Self::new(pool))
    }
}

/// Space ID は BIGINT 列に収まる範囲のみ扱う
fn space_key(space_id: SpaceId) -> Result<i64, StoreError> {
    i64::try_from(space_id.value())
        .map_err(|_| StoreError::Backend(format!("space id {} out of range", space_id)))
}

#[async_trait]
impl PersistenceStore for PgPersistenceStore {
    async fn load_whiteboard(&self, space_id: SpaceId) -> Result<Option<Scene>, StoreError> {
        let row = sqlx::query_as::<_, (Option<Value>, Option<Value>)>(
            r#"
SELECT elements, app_state
FROM space_whiteboards
WHERE space_id = $1
  AND deleted_at IS NULL
            "#,
        )
        .bind(space_key(space_id)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(elements, app_state)| {
            let empty = Scene::default();
            Scene::new(
                elements.unwrap_or(empty.elements),
                app_state.unwrap_or(empty.app_state),
            )
        }))
    }

    async fn save_whiteboard(&self, space_id: SpaceId, scene: &Scene) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO space_whiteboards (space_id, elements, app_state, created_at, updated_at)
VALUES ($1, $2, $3, NOW(), NOW())
ON CONFLICT (space_id) DO UPDATE
SET elements = EXCLUDED.elements,
    app_state = EXCLUDED.app_state,
    updated_at = NOW(),
    deleted_at = NULL
            "#,
        )
        .bind(space_key(space_id)?)
        .bind(Json(&scene.elements))
        .bind(Json(&scene.app_state))
        .execute(&self.pool)
        .await?;

        tracing::debug!("Whiteboard of space '{}' upserted", space_id);
        Ok(())
    }

    async fn lookup_user(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        // users.id は数値。数値でない ID は該当なしとして扱う
        let Ok(id) = user_id.as_str().parse::<i64>() else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, (String, Option<String>, Option<String>)>(
            r#"
SELECT name, nickname, status
FROM users
WHERE id = $1
  AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, nickname, status)| UserProfile {
            id: user_id.clone(),
            name,
            nickname: nickname.unwrap_or_default(),
            status: parse_status(user_id, status.as_deref()),
        }))
    }
}

fn parse_status(user_id: &UserId, status: Option<&str>) -> PlayerStatus {
    match status {
        None | Some("") => PlayerStatus::default(),
        Some(value) => value.parse().unwrap_or_else(|e| {
            tracing::warn!("User '{}' has an invalid status: {}", user_id, e);
            PlayerStatus::default()
        }),
    }
}
