//! 快照仓储协议与策略
//!
//! 定义聚合快照读写接口与落盘策略（按版本间隔）。
//! 快照只是重放加速：写入失败不影响事件追加的结果，
//! 留存清理失败也不影响快照写入本身。
//!
use crate::{
    error::DomainResult as Result,
    persist::SerializedSnapshot,
    value_object::{StreamId, Version},
};
use async_trait::async_trait;
use std::sync::Arc;

/// 默认快照间隔（每隔多少个版本落一次快照）
pub const DEFAULT_SNAPSHOT_INTERVAL: usize = 100;

/// 默认留存数量（每个流保留最近多少个快照）
pub const DEFAULT_SNAPSHOT_RETAIN: usize = 3;

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// 查询快照：`up_to` 为 None 时返回最新快照，
    /// 否则返回版本不超过 `up_to` 的最高版本快照
    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        up_to: Option<Version>,
    ) -> Result<Option<SerializedSnapshot>>;

    /// 写入快照；成功后按留存数量清理同流的旧快照
    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()>;
}

#[async_trait]
impl<T> SnapshotRepository for Arc<T>
where
    T: SnapshotRepository + ?Sized,
{
    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        up_to: Option<Version>,
    ) -> Result<Option<SerializedSnapshot>> {
        (**self).get_snapshot(stream_id, up_to).await
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> Result<()> {
        (**self).save_snapshot(snapshot).await
    }
}

/// 快照落盘策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    Never,
    Every(usize),
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::Every(DEFAULT_SNAPSHOT_INTERVAL)
    }
}

impl SnapshotPolicy {
    /// 一次保存把流从 `previous` 推进到 `current` 后是否应当落快照。
    /// 判定为“跨过间隔边界”：批量追加可能一次越过多个间隔点，
    /// 单事件保存时退化为整除判断。
    pub fn should_snapshot(&self, previous: Version, current: Version) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                current.is_created() && previous.value() / interval < current.value() / interval
            }
        }
    }
}
