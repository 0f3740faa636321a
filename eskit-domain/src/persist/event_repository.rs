//! 事件仓储协议（追加日志）
//!
//! 每个流是一条按版本全序的只追加日志：
//! - `append` 以“期望版本”为前置条件做原子条件写入，失败即整批不落盘；
//! - `read_from` 返回按版本升序、连续无洞的惰性序列，可随时丢弃以取消读取；
//! - `current_version` 对从未写入的流返回初始版本。
//! 版本不匹配与瞬时存储故障都原样抛给调用方，仓储内部从不重试。
//!
use crate::{
    aggregate::Aggregate,
    domain_event::AggregateEvents,
    error::DomainResult,
    event_upcaster::EventUpcasterChain,
    persist::{SerializedEvent, deserialize_events},
    value_object::{StreamId, Version},
};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::Arc;

/// 事件流：按版本升序的惰性记录序列
pub type EventStream = BoxStream<'static, DomainResult<SerializedEvent>>;

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// 原子追加一批事件
    ///
    /// 当流当前版本不等于 `expected_version` 时返回 `VersionConflict`，
    /// 不产生任何部分写入；成功时记录被连续赋值
    /// `expected+1..=expected+n` 并返回新的当前版本。空批次是非法参数。
    async fn append(
        &self,
        stream_id: &StreamId,
        events: Vec<SerializedEvent>,
        expected_version: Version,
    ) -> DomainResult<Version>;

    /// 从 `from_version`（含）起按版本升序惰性读取
    ///
    /// `from_version` 为初始版本时从头读取。返回的序列保证连续且严格递增；
    /// 读取无副作用，丢弃流即取消。
    async fn read_from(&self, stream_id: &StreamId, from_version: Version)
    -> DomainResult<EventStream>;

    /// 流的当前版本；从未写入的流返回初始版本（0）
    async fn current_version(&self, stream_id: &StreamId) -> DomainResult<Version>;
}

#[async_trait]
impl<T> EventRepository for Arc<T>
where
    T: EventRepository + ?Sized,
{
    async fn append(
        &self,
        stream_id: &StreamId,
        events: Vec<SerializedEvent>,
        expected_version: Version,
    ) -> DomainResult<Version> {
        (**self).append(stream_id, events, expected_version).await
    }

    async fn read_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> DomainResult<EventStream> {
        (**self).read_from(stream_id, from_version).await
    }

    async fn current_version(&self, stream_id: &StreamId) -> DomainResult<Version> {
        (**self).current_version(stream_id).await
    }
}

#[async_trait]
pub trait EventRepositoryExt: EventRepository {
    /// 读取并收集 `[from, to]` 区间内的事件（`to` 为 None 表示读到流尾）
    ///
    /// 上界判断发生在消费端：一旦越界立即停止拉取，
    /// 惰性分页使得未读区间不会被加载。
    async fn collect_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
        to_version: Option<Version>,
    ) -> DomainResult<Vec<SerializedEvent>> {
        let mut stream = self.read_from(stream_id, from_version).await?;
        let mut records = Vec::new();

        while let Some(next) = stream.next().await {
            let record = next?;
            if to_version.is_some_and(|to| record.aggregate_version() > to) {
                break;
            }
            records.push(record);
        }

        Ok(records)
    }

    /// 拉取并上抬（Upcast）指定聚合的全部事件，返回 `AggregateEvents`
    async fn aggregate_events<A: Aggregate>(
        &self,
        aggregate_id: &A::Id,
        upcaster_chain: &EventUpcasterChain,
    ) -> DomainResult<AggregateEvents<A>> {
        let stream_id = StreamId::for_aggregate::<A>(aggregate_id);
        let serialized = self
            .collect_from(&stream_id, Version::new(), None)
            .await?;
        let envelopes = deserialize_events::<A>(upcaster_chain, serialized)?;
        Ok(AggregateEvents::new(envelopes))
    }
}

#[async_trait]
impl<T> EventRepositoryExt for T where T: EventRepository + ?Sized {}
