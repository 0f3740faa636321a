//! 领域层统一错误定义
//!
//! 覆盖持久化协议的完整错误分类：并发冲突、存储不可用、序列化/上抬失败、
//! 命令与状态校验等，便于在各实现层统一转换为 `DomainError`。
//! 冲突与不可用错误原样向调用方传播（重试决策在用例层）；
//! 快照写入失败从不经由此类型到达 `save` 的调用方。
//!
use crate::value_object::Version;
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化/事件上抬 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("parse error: {reason}")]
    Parse { reason: String },
    #[error(
        "upcast failed: type={event_type}, from_version={from_version}, stage={stage:?}, reason={reason}"
    )]
    UpcastFailed {
        event_type: String,
        from_version: usize,
        stage: Option<&'static str>,
        reason: String,
    },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 仓储/持久化 ---
    #[error("version conflict: expected={expected}, actual={actual}")]
    VersionConflict { expected: Version, actual: Version },
    #[error("storage unavailable: {reason}")]
    StorageUnavailable { reason: String },
    #[error("event repository error: {reason}")]
    EventRepository { reason: String },
    #[error("snapshot repository error: {reason}")]
    SnapshotRepository { reason: String },
    #[error("database error: {reason}")]
    Database { reason: String },

    // --- 领域规则/命令与状态 ---
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },

    // --- 通用 ---
    #[error("invalid aggregate id: {0}")]
    InvalidAggregateId(String),
}

impl DomainError {
    pub fn storage_unavailable(reason: impl Into<String>) -> Self {
        DomainError::StorageUnavailable {
            reason: reason.into(),
        }
    }

    pub fn event_repository(reason: impl Into<String>) -> Self {
        DomainError::EventRepository {
            reason: reason.into(),
        }
    }

    pub fn snapshot_repository(reason: impl Into<String>) -> Self {
        DomainError::SnapshotRepository {
            reason: reason.into(),
        }
    }

    pub fn invalid_command(reason: impl Into<String>) -> Self {
        DomainError::InvalidCommand {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        DomainError::InvalidState {
            reason: reason.into(),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        DomainError::NotFound {
            reason: reason.into(),
        }
    }

    /// 是否为瞬时故障：调用方可带退避重试，不属于应用层错误
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::StorageUnavailable { .. })
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

// ---- Cross-crate conversions for infrastructure convenience ----
// 允许在基础设施层直接使用 `?` 将 sqlx/uuid 等错误转换为 DomainError

#[cfg(feature = "infra-sqlx")]
impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DomainError::NotFound {
                reason: "row not found".to_string(),
            },
            // 连接层故障属于瞬时错误，区别于一般数据库错误
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DomainError::StorageUnavailable {
                reason: err.to_string(),
            },
            other => DomainError::Database {
                reason: other.to_string(),
            },
        }
    }
}

impl From<uuid::Error> for DomainError {
    fn from(err: uuid::Error) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<std::num::ParseIntError> for DomainError {
    fn from(err: std::num::ParseIntError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<std::num::TryFromIntError> for DomainError {
    fn from(err: std::num::TryFromIntError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for DomainError {
    fn from(err: chrono::ParseError) -> Self {
        DomainError::Parse {
            reason: err.to_string(),
        }
    }
}
