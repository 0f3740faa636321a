//! 聚合仓储组合实现
//!
//! 基于事件溯源（Event Store）与快照（Snapshot）的通用聚合仓储实现，
//! 通过事件上抬链在重建过程中完成旧事件兼容。
//! 快照只是性能优化：带快照与全量重放的加载结果可观测等价。
//!
use crate::error::DomainError;
use crate::{
    aggregate::Aggregate,
    domain_event::{EventContext, EventEnvelope},
    entity::Entity,
    event_upcaster::EventUpcasterChain,
    persist::{
        EventRepository, EventRepositoryExt, SerializedEvent, SerializedSnapshot, SnapshotPolicy,
        SnapshotRepository, deserialize_events, serialize_events,
    },
    value_object::{StreamId, Version},
};
use async_trait::async_trait;
use bon::Builder;
use std::sync::Arc;

#[async_trait]
pub trait AggregateRepository<A>: Send + Sync
where
    A: Aggregate,
{
    /// 加载聚合的当前状态；流不存在时返回 None
    async fn load(&self, aggregate_id: &A::Id) -> Result<Option<A>, A::Error>;

    /// 重建聚合到历史版本 `to_version`（含）；用于审计与排障，非热路径
    async fn rebuild(
        &self,
        aggregate_id: &A::Id,
        to_version: Version,
    ) -> Result<Option<A>, A::Error>;

    /// 持久化聚合的未提交事件；并发冲突原样抛出，由用例层决定如何重试
    async fn save(
        &self,
        aggregate: &A,
        events: Vec<A::Event>,
        context: EventContext,
    ) -> Result<Vec<EventEnvelope<A>>, A::Error>;
}

#[async_trait]
impl<A, T> AggregateRepository<A> for Arc<T>
where
    A: Aggregate,
    T: AggregateRepository<A> + ?Sized,
{
    async fn load(&self, aggregate_id: &A::Id) -> Result<Option<A>, A::Error> {
        (**self).load(aggregate_id).await
    }

    async fn rebuild(
        &self,
        aggregate_id: &A::Id,
        to_version: Version,
    ) -> Result<Option<A>, A::Error> {
        (**self).rebuild(aggregate_id, to_version).await
    }

    async fn save(
        &self,
        aggregate: &A,
        events: Vec<A::Event>,
        context: EventContext,
    ) -> Result<Vec<EventEnvelope<A>>, A::Error> {
        (**self).save(aggregate, events, context).await
    }
}

/// 基于事件存储的通用聚合仓储实现。
/// - 使用 `EventRepository` 读取/追加事件
/// - 在重建聚合时通过 `EventUpcasterChain` 对事件进行上抬
pub struct EventSourcedRepository<E> {
    event_repo: Arc<E>,
    upcaster_chain: Arc<EventUpcasterChain>,
}

impl<E> EventSourcedRepository<E>
where
    E: EventRepository,
{
    pub fn new(event_repo: Arc<E>, upcaster_chain: Arc<EventUpcasterChain>) -> Self {
        Self {
            event_repo,
            upcaster_chain,
        }
    }

    /// 从 `aggregate` 的当前版本之后继续重放事件，
    /// `to_version` 限定重放上界（None 表示到流尾）。
    /// 返回 None 表示该流既无快照基础也无事件（聚合从未存在）。
    pub(crate) async fn replay_onto<A>(
        &self,
        mut aggregate: A,
        to_version: Option<Version>,
    ) -> Result<Option<A>, DomainError>
    where
        A: Aggregate,
    {
        let stream_id = StreamId::for_aggregate::<A>(aggregate.id());
        let serialized = self
            .event_repo
            .collect_from(&stream_id, aggregate.version().next(), to_version)
            .await?;

        if serialized.is_empty() && aggregate.version().is_new() {
            return Ok(None);
        }

        if serialized.is_empty() {
            return Ok(Some(aggregate));
        }

        // 流内版本以持久化记录为准：上抬可能拆分/丢弃载荷，但不改变日志位点
        let last_version = serialized
            .last()
            .map(SerializedEvent::aggregate_version)
            .unwrap_or_else(|| aggregate.version());

        let envelopes = deserialize_events::<A>(&self.upcaster_chain, serialized)?;

        for env in &envelopes {
            aggregate.apply(&env.payload);
        }
        aggregate.set_version(last_version);

        Ok(Some(aggregate))
    }

    pub(crate) async fn append_events<A>(
        &self,
        aggregate: &A,
        events: Vec<A::Event>,
        context: EventContext,
    ) -> Result<Vec<EventEnvelope<A>>, DomainError>
    where
        A: Aggregate,
    {
        let envelopes: Vec<EventEnvelope<A>> = events
            .into_iter()
            .map(|e| EventEnvelope::new(aggregate.id(), e, context.clone()))
            .collect();

        if envelopes.is_empty() {
            return Ok(envelopes);
        }

        let serialized = serialize_events(&envelopes)?;
        let stream_id = StreamId::for_aggregate::<A>(aggregate.id());

        // 期望版本即聚合的已持久化版本：未提交事件不推进它
        self.event_repo
            .append(&stream_id, serialized, aggregate.version())
            .await?;

        Ok(envelopes)
    }
}

#[async_trait]
impl<A, E> AggregateRepository<A> for EventSourcedRepository<E>
where
    A: Aggregate,
    E: EventRepository + Send + Sync,
    A::Error: From<DomainError> + Send + Sync,
{
    async fn load(&self, aggregate_id: &A::Id) -> Result<Option<A>, A::Error> {
        let aggregate = self
            .replay_onto(<A as Entity>::new(aggregate_id.clone()), None)
            .await
            .map_err(A::Error::from)?;

        Ok(aggregate)
    }

    async fn rebuild(
        &self,
        aggregate_id: &A::Id,
        to_version: Version,
    ) -> Result<Option<A>, A::Error> {
        if to_version.is_new() {
            return Ok(None);
        }

        let aggregate = self
            .replay_onto(<A as Entity>::new(aggregate_id.clone()), Some(to_version))
            .await
            .map_err(A::Error::from)?;

        Ok(aggregate)
    }

    async fn save(
        &self,
        aggregate: &A,
        events: Vec<A::Event>,
        context: EventContext,
    ) -> Result<Vec<EventEnvelope<A>>, A::Error> {
        self.append_events(aggregate, events, context)
            .await
            .map_err(A::Error::from)
    }
}

/// 基于事件存储 + 快照的通用聚合仓储实现。
/// - 加载时优先用最近快照做基础状态，再增量重放并上抬；
/// - 保存时按策略在跨过间隔边界后落快照，快照失败只记日志不影响保存。
#[derive(Builder)]
pub struct SnapshottingRepository<E, S>
where
    E: EventRepository,
    S: SnapshotRepository,
{
    event_repo: Arc<E>,
    snapshot_repo: Arc<S>,
    upcaster_chain: Arc<EventUpcasterChain>,
    #[builder(default)]
    policy: SnapshotPolicy,
}

impl<E, S> SnapshottingRepository<E, S>
where
    E: EventRepository,
    S: SnapshotRepository,
{
    /// 以默认策略（每 100 个版本落一次快照）构造
    pub fn new(
        event_repo: Arc<E>,
        snapshot_repo: Arc<S>,
        upcaster_chain: Arc<EventUpcasterChain>,
    ) -> Self {
        Self {
            event_repo,
            snapshot_repo,
            upcaster_chain,
            policy: SnapshotPolicy::default(),
        }
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    fn replayer(&self) -> EventSourcedRepository<E> {
        EventSourcedRepository::new(
            Arc::clone(&self.event_repo),
            Arc::clone(&self.upcaster_chain),
        )
    }

    async fn load_from_snapshot<A>(
        &self,
        aggregate_id: &A::Id,
        up_to: Option<Version>,
    ) -> Result<Option<A>, DomainError>
    where
        A: Aggregate,
    {
        let stream_id = StreamId::for_aggregate::<A>(aggregate_id);

        let base = match self.snapshot_repo.get_snapshot(&stream_id, up_to).await? {
            Some(snapshot) => snapshot.to_aggregate::<A>()?,
            None => <A as Entity>::new(aggregate_id.clone()),
        };

        self.replayer().replay_onto(base, up_to).await
    }
}

#[async_trait]
impl<A, E, S> AggregateRepository<A> for SnapshottingRepository<E, S>
where
    A: Aggregate,
    E: EventRepository + Send + Sync,
    S: SnapshotRepository + Send + Sync,
    A::Error: From<DomainError> + Send + Sync,
{
    async fn load(&self, aggregate_id: &A::Id) -> Result<Option<A>, A::Error> {
        let aggregate = self
            .load_from_snapshot(aggregate_id, None)
            .await
            .map_err(A::Error::from)?;

        Ok(aggregate)
    }

    async fn rebuild(
        &self,
        aggregate_id: &A::Id,
        to_version: Version,
    ) -> Result<Option<A>, A::Error> {
        if to_version.is_new() {
            return Ok(None);
        }

        let aggregate = self
            .load_from_snapshot(aggregate_id, Some(to_version))
            .await
            .map_err(A::Error::from)?;

        Ok(aggregate)
    }

    async fn save(
        &self,
        aggregate: &A,
        events: Vec<A::Event>,
        context: EventContext,
    ) -> Result<Vec<EventEnvelope<A>>, A::Error> {
        let expected = aggregate.version();

        let envelopes = self
            .replayer()
            .append_events(aggregate, events, context.clone())
            .await
            .map_err(A::Error::from)?;

        if envelopes.is_empty() {
            return Ok(envelopes);
        }

        let new_version = Version::from_value(expected.value() + envelopes.len());

        if self.policy.should_snapshot(expected, new_version) {
            // 事件已落盘，此处失败只损失一次重放加速，不影响保存结果
            let mut state = aggregate.clone();
            state.set_version(new_version);

            match SerializedSnapshot::from_aggregate(&state, context.tenant_id()) {
                Ok(snapshot) => {
                    if let Err(err) = self.snapshot_repo.save_snapshot(snapshot).await {
                        tracing::warn!(
                            stream = %StreamId::for_aggregate::<A>(aggregate.id()),
                            version = %new_version,
                            error = %err,
                            "snapshot write failed after durable append",
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        stream = %StreamId::for_aggregate::<A>(aggregate.id()),
                        version = %new_version,
                        error = %err,
                        "snapshot serialization failed",
                    );
                }
            }
        }

        Ok(envelopes)
    }
}
