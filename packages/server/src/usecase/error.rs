//! UseCase 層のエラー定義

use thiserror::Error;

use crate::domain::{StoreError, ValueObjectError};

/// 接続受付時のエラー（部屋に入る前に接続を拒否する）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("user identity is missing")]
    MissingIdentity,
    #[error("invalid room id: {0}")]
    InvalidRoom(String),
    #[error("unknown user '{0}'")]
    UnknownUser(String),
    #[error("persistence store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<ValueObjectError> for ConnectError {
    fn from(e: ValueObjectError) -> Self {
        match e {
            ValueObjectError::UserIdEmpty => ConnectError::MissingIdentity,
            other => ConnectError::InvalidRoom(other.to_string()),
        }
    }
}

impl From<StoreError> for ConnectError {
    fn from(e: StoreError) -> Self {
        ConnectError::StoreUnavailable(e.to_string())
    }
}
