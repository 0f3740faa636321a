use crate::aggregate::Aggregate;
use crate::value_object::StreamId;
use chrono::Utc;
use uuid::Uuid;

use super::event_context::EventContext;
use super::metadata::Metadata;

/// 事件信封，包含事件标识、元数据、事件载荷与业务上下文
///
/// `event_id` 在创建时生成且不可变；聚合版本不在信封上，
/// 由存储层在追加时赋给持久化记录。
#[derive(Debug, Clone)]
pub struct EventEnvelope<A>
where
    A: Aggregate,
{
    pub event_id: String,
    pub metadata: Metadata,
    pub payload: A::Event,
    pub context: EventContext,
}

impl<A> EventEnvelope<A>
where
    A: Aggregate,
{
    pub fn new(aggregate_id: &A::Id, payload: A::Event, context: EventContext) -> Self {
        let metadata = Metadata::builder()
            .stream_id(StreamId::for_aggregate::<A>(aggregate_id))
            .occurred_at(Utc::now())
            .build();

        Self {
            event_id: Uuid::new_v4().to_string(),
            metadata,
            payload,
            context,
        }
    }
}
