//! 事件持久化模型（SerializedEvent）
//!
//! 定义事件在持久化层的标准形态与在 `EventEnvelope` 间的转换，
//! 并提供批量序列化/反序列化与上抬组合的工具函数。
//! `aggregate_version` 与 `recorded_at` 由存储层在追加时赋值；
//! 序列化阶段二者分别为初始版本与空。
//!
use crate::{
    aggregate::Aggregate,
    domain_event::{DomainEvent, EventContext, EventEnvelope, Metadata},
    error::{DomainError, DomainResult},
    event_upcaster::EventUpcasterChain,
    value_object::{StreamId, Version},
};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// 事件唯一标识符，创建时生成
    event_id: String,
    /// 事件类型，用于区分不同的事件
    event_type: String,
    /// 事件载荷版本，用于事件版本控制和上抬
    event_version: usize,
    /// 聚合类型，用于区分不同的聚合根
    aggregate_type: String,
    /// 聚合 ID，标识事件所属的聚合根实例
    aggregate_id: String,
    /// 聚合版本（流内位点），由存储层在追加时赋值
    #[builder(default)]
    aggregate_version: Version,
    /// 租户隔离键（冗余存储，便于多租户过滤）
    tenant_id: Option<String>,
    /// 关联 ID，用于将多个事件关联到同一个业务操作
    correlation_id: Option<String>,
    /// 因果 ID，用于表示事件的触发来源
    causation_id: Option<String>,
    /// 触发事件的主体类型（如用户、系统等）
    actor_type: Option<String>,
    /// 触发事件的主体 ID
    actor_id: Option<String>,
    /// 事件发生时间（业务时间）
    occurred_at: DateTime<Utc>,
    /// 事件落盘时间（存储时间），由存储层在追加后赋值
    recorded_at: Option<DateTime<Utc>>,
    /// 事件负载，存储事件的具体数据
    payload: Value,
    /// 业务上下文信息（冗余存储，便于查询）
    context: Value,
}

impl SerializedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> usize {
        self.event_version
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_version(&self) -> Version {
        self.aggregate_version
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    pub fn actor_type(&self) -> Option<&str> {
        self.actor_type.as_deref()
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        self.recorded_at
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    /// 事件所属的流标识
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.aggregate_type.clone(), self.aggregate_id.clone())
    }

    /// 存储层在追加时为记录赋值流内版本
    pub fn with_aggregate_version(mut self, version: Version) -> Self {
        self.aggregate_version = version;
        self
    }

    /// 存储层在追加时为记录赋值落盘时间
    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }
}

impl<A> TryFrom<&EventEnvelope<A>> for SerializedEvent
where
    A: Aggregate,
{
    type Error = DomainError;

    fn try_from(envelope: &EventEnvelope<A>) -> Result<Self, Self::Error> {
        Ok(SerializedEvent {
            event_id: envelope.event_id.clone(),
            event_type: envelope.payload.event_type().to_string(),
            event_version: envelope.payload.event_version(),
            aggregate_type: envelope.metadata.stream_id().aggregate_type().to_string(),
            aggregate_id: envelope.metadata.stream_id().aggregate_id().to_string(),
            aggregate_version: Version::new(),
            tenant_id: envelope.context.tenant_id().map(|s| s.to_string()),
            correlation_id: envelope.context.correlation_id().map(|s| s.to_string()),
            causation_id: envelope.context.causation_id().map(|s| s.to_string()),
            actor_type: envelope.context.actor_type().map(|s| s.to_string()),
            actor_id: envelope.context.actor_id().map(|s| s.to_string()),
            occurred_at: *envelope.metadata.occurred_at(),
            recorded_at: None,
            payload: serde_json::to_value(&envelope.payload)?,
            context: serde_json::to_value(&envelope.context)?,
        })
    }
}

impl<A> TryFrom<&SerializedEvent> for EventEnvelope<A>
where
    A: Aggregate,
{
    type Error = DomainError;

    fn try_from(value: &SerializedEvent) -> Result<Self, Self::Error> {
        if value.aggregate_type != A::TYPE {
            return Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: value.aggregate_type.clone(),
            });
        }

        let metadata = Metadata::builder()
            .stream_id(value.stream_id())
            .occurred_at(value.occurred_at)
            .build();

        let payload: A::Event = serde_json::from_value(value.payload.clone())?;

        let context: EventContext = serde_json::from_value(value.context.clone())?;

        Ok(EventEnvelope {
            event_id: value.event_id.clone(),
            metadata,
            payload,
            context,
        })
    }
}

pub fn serialize_events<A>(events: &[EventEnvelope<A>]) -> DomainResult<Vec<SerializedEvent>>
where
    A: Aggregate,
{
    events.iter().map(SerializedEvent::try_from).collect()
}

/// 反序列化前先经过上抬链，保证旧载荷形态在重放路径上被兼容转换。
/// 任一事件解码失败即中止整批重放，绝不静默跳过。
pub fn deserialize_events<A>(
    upcaster_chain: &EventUpcasterChain,
    events: Vec<SerializedEvent>,
) -> DomainResult<Vec<EventEnvelope<A>>>
where
    A: Aggregate,
{
    let events = upcaster_chain.upcast_all(events)?;

    events.iter().map(EventEnvelope::try_from).collect()
}
