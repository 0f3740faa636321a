//! 事件上抬（Event Upcasting）
//!
//! 当事件载荷结构演进时，通过上抬器（`EventUpcaster`）在读取路径对旧事件进行
//! 逐步转换（拆分/合并/重命名/丢弃等），`EventUpcasterChain` 负责串联多步转换
//! 并在稳定后返回。上抬链在构造仓储时显式注入，不存在任何全局注册表。
//!
use crate::{error::DomainResult as Result, persist::SerializedEvent};
use std::sync::Arc;

/// 事件版本升级器（Upcaster）
pub trait EventUpcaster: Send + Sync {
    fn applies(&self, event_type: &str, event_version: usize) -> bool;

    fn upcast(&self, event: SerializedEvent) -> Result<EventUpcasterResult>;
}

impl<T> EventUpcaster for Arc<T>
where
    T: EventUpcaster + ?Sized,
{
    fn applies(&self, event_type: &str, event_version: usize) -> bool {
        (**self).applies(event_type, event_version)
    }

    fn upcast(&self, event: SerializedEvent) -> Result<EventUpcasterResult> {
        (**self).upcast(event)
    }
}

/// 升级结果：单个、新的多个、或丢弃
#[allow(clippy::large_enum_variant)]
pub enum EventUpcasterResult {
    One(SerializedEvent),
    Many(Vec<SerializedEvent>),
    Drop,
}

/// 事件升级链：按顺序应用多个 Upcaster，直到整批不再变化
pub struct EventUpcasterChain {
    stages: Vec<Arc<dyn EventUpcaster>>,
}

impl Default for EventUpcasterChain {
    fn default() -> Self {
        Self::from_iter(vec![])
    }
}

impl EventUpcasterChain {
    /// 对一批事件进行升级，直到不再有升级发生
    pub fn upcast_all(&self, mut events: Vec<SerializedEvent>) -> Result<Vec<SerializedEvent>> {
        if self.stages.is_empty() {
            return Ok(events);
        }

        loop {
            let mut changed = false;
            let mut next = Vec::with_capacity(events.len());

            for event in events {
                next.extend(self.upcast_event(event, &mut changed)?);
            }

            if !changed {
                return Ok(next);
            }
            events = next;
        }
    }

    // 单个事件依次通过所有阶段；每个阶段可能产出 0..n 个事件
    fn upcast_event(
        &self,
        event: SerializedEvent,
        changed: &mut bool,
    ) -> Result<Vec<SerializedEvent>> {
        let mut current = vec![event];

        for stage in &self.stages {
            let mut out = Vec::with_capacity(current.len());
            for event in current {
                if stage.applies(event.event_type(), event.event_version()) {
                    *changed = true;
                    match stage.upcast(event)? {
                        EventUpcasterResult::One(e) => out.push(e),
                        EventUpcasterResult::Many(v) => out.extend(v),
                        EventUpcasterResult::Drop => {}
                    }
                } else {
                    out.push(event);
                }
            }
            current = out;
        }

        Ok(current)
    }
}

impl FromIterator<Arc<dyn EventUpcaster>> for EventUpcasterChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn EventUpcaster>>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}

impl Extend<Arc<dyn EventUpcaster>> for EventUpcasterChain {
    fn extend<I: IntoIterator<Item = Arc<dyn EventUpcaster>>>(&mut self, iter: I) {
        self.stages.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::{EventUpcaster, EventUpcasterChain, EventUpcasterResult};
    use crate::error::{DomainError, DomainResult};
    use crate::persist::SerializedEvent;
    use crate::value_object::Version;
    use chrono::Utc;
    use std::sync::Arc;

    fn mk_event(ty: &str, ver: usize, payload: serde_json::Value) -> SerializedEvent {
        SerializedEvent::builder()
            .event_id(ulid::Ulid::new().to_string())
            .event_type(ty.to_string())
            .event_version(ver)
            .aggregate_type("order".to_string())
            .aggregate_id("a-1".to_string())
            .aggregate_version(Version::from_value(1))
            .maybe_tenant_id(Some("t-1".into()))
            .maybe_correlation_id(Some("cor-a-1".into()))
            .maybe_causation_id(Some("cau-a-1".into()))
            .maybe_actor_type(Some("user".into()))
            .maybe_actor_id(Some("u-1".into()))
            .occurred_at(Utc::now())
            .payload(payload)
            .context(serde_json::json!({}))
            .build()
    }

    // 复制一条事件，仅替换类型/版本/载荷
    fn remap(event: &SerializedEvent, ty: &str, ver: usize, payload: serde_json::Value) -> SerializedEvent {
        SerializedEvent::builder()
            .event_id(event.event_id().to_string())
            .event_type(ty.to_string())
            .event_version(ver)
            .aggregate_type(event.aggregate_type().to_string())
            .aggregate_id(event.aggregate_id().to_string())
            .aggregate_version(event.aggregate_version())
            .maybe_tenant_id(event.tenant_id().map(|s| s.to_string()))
            .maybe_correlation_id(event.correlation_id().map(|s| s.to_string()))
            .maybe_causation_id(event.causation_id().map(|s| s.to_string()))
            .maybe_actor_type(event.actor_type().map(|s| s.to_string()))
            .maybe_actor_id(event.actor_id().map(|s| s.to_string()))
            .occurred_at(event.occurred_at())
            .payload(payload)
            .context(event.context().clone())
            .build()
    }

    struct SplitV1; // v1 -> two events
    impl EventUpcaster for SplitV1 {
        fn applies(&self, event_type: &str, event_version: usize) -> bool {
            event_type == "legacy.order.created" && event_version == 1
        }

        fn upcast(&self, event: SerializedEvent) -> DomainResult<EventUpcasterResult> {
            let id = event
                .payload()
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let init = remap(
                &event,
                "order.init",
                2,
                serde_json::json!({ "id": id, "stage": "init" }),
            );
            let meta = remap(
                &event,
                "order.meta",
                1,
                serde_json::json!({ "id": id, "meta": {"source": "legacy"} }),
            );

            Ok(EventUpcasterResult::Many(vec![init, meta]))
        }
    }

    struct DropMeta; // drop order.meta events
    impl EventUpcaster for DropMeta {
        fn applies(&self, event_type: &str, _event_version: usize) -> bool {
            event_type == "order.meta"
        }
        fn upcast(&self, _event: SerializedEvent) -> DomainResult<EventUpcasterResult> {
            Ok(EventUpcasterResult::Drop)
        }
    }

    struct RenameInitToCreated; // v2 init -> v3 created
    impl EventUpcaster for RenameInitToCreated {
        fn applies(&self, event_type: &str, event_version: usize) -> bool {
            event_type == "order.init" && event_version == 2
        }
        fn upcast(&self, event: SerializedEvent) -> DomainResult<EventUpcasterResult> {
            let payload = event.payload().clone();
            Ok(EventUpcasterResult::One(remap(
                &event,
                "order.created",
                3,
                payload,
            )))
        }
    }

    #[test]
    fn complex_chain_split_drop_until_stable() {
        let chain: EventUpcasterChain = vec![
            Arc::new(SplitV1) as Arc<dyn EventUpcaster>,
            Arc::new(DropMeta) as Arc<dyn EventUpcaster>,
            Arc::new(RenameInitToCreated) as Arc<dyn EventUpcaster>,
        ]
        .into_iter()
        .collect();

        let legacy = mk_event("legacy.order.created", 1, serde_json::json!({"id": "o-1"}));
        let other = mk_event("noop", 1, serde_json::json!({"x": 1}));

        let out = chain.upcast_all(vec![legacy, other.clone()]).unwrap();

        // 期望：legacy 生成 init(v2) + meta(v1)，随后 meta 被 Drop，init(v2) -> created(v3)
        // 另一个事件保持不变
        assert_eq!(out.len(), 2);
        let types: Vec<(String, usize)> = out
            .iter()
            .map(|e| (e.event_type().to_string(), e.event_version()))
            .collect();
        assert!(types.contains(&("order.created".to_string(), 3)));
        assert!(types.contains(&(other.event_type().to_string(), other.event_version())));
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = EventUpcasterChain::default();
        let input = vec![mk_event("noop", 1, serde_json::json!({"x": 1}))];
        let out = chain.upcast_all(input.clone()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].event_type(), input[0].event_type());
    }

    struct AlwaysFail;
    impl EventUpcaster for AlwaysFail {
        fn applies(&self, _event_type: &str, _event_version: usize) -> bool {
            true
        }
        fn upcast(&self, event: SerializedEvent) -> DomainResult<EventUpcasterResult> {
            Err(DomainError::UpcastFailed {
                event_type: event.event_type().to_string(),
                from_version: event.event_version(),
                stage: Some("AlwaysFail"),
                reason: "boom".into(),
            })
        }
    }

    #[test]
    fn upcast_failure_returns_error() {
        let chain: EventUpcasterChain = vec![Arc::new(AlwaysFail) as Arc<dyn EventUpcaster>]
            .into_iter()
            .collect();
        let input = vec![mk_event("noop", 1, serde_json::json!({}))];
        let err = chain.upcast_all(input).unwrap_err();
        match err {
            DomainError::UpcastFailed { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }
}
