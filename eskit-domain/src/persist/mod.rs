//! 持久化与事件溯源（persist）
//!
//! 定义事件仓储、快照仓储及其通用组合实现，支持：
//! - 条件追加与惰性区间读取（`EventRepository`）；
//! - 快照读写与落盘策略（`SnapshotRepository`/`SnapshotPolicy`）；
//! - 事件上抬（Upcast）与反序列化（`deserialize_events`）；
//! - 纯事件或事件+快照的聚合仓储实现
//!   （`EventSourcedRepository`、`SnapshottingRepository`）。
//!
//! 该模块聚焦协议与装配逻辑；内存后端内置（`memory`），
//! Postgres 后端经由特性 `infra-sqlx` 提供（`postgres`）。
//!
mod aggregate_repository;
mod event_repository;
pub mod memory;
#[cfg(feature = "infra-sqlx")]
pub mod postgres;
mod serialized_event;
mod serialized_snapshot;
mod snapshot_repository;

pub use aggregate_repository::{
    AggregateRepository, EventSourcedRepository, SnapshottingRepository,
};
pub use event_repository::{EventRepository, EventRepositoryExt, EventStream};
pub use serialized_event::{SerializedEvent, deserialize_events, serialize_events};
pub use serialized_snapshot::SerializedSnapshot;
pub use snapshot_repository::{
    DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_RETAIN, SnapshotPolicy, SnapshotRepository,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregate;
    use crate::domain_event::{EventContext, EventEnvelope};
    use crate::entity::Entity;
    use crate::error::DomainError;
    use crate::event_upcaster::{EventUpcaster, EventUpcasterChain, EventUpcasterResult};
    use crate::value_object::Version;
    use chrono::Utc;
    use eskit_macros::{entity, event};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[entity]
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    #[event(version = 2)]
    enum UserEvent {
        Created { name: String },
    }

    impl Aggregate for User {
        const TYPE: &'static str = "user";
        type Command = ();
        type Event = UserEvent;
        type Error = DomainError;
        fn execute(&self, _command: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            Ok(vec![])
        }
        fn apply(&mut self, event: &Self::Event) {
            match event {
                UserEvent::Created { name } => {
                    self.name = name.clone();
                }
            }
        }
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let env = EventEnvelope::<User>::new(
            &"u-1".to_string(),
            UserEvent::Created {
                name: "alice".into(),
            },
            EventContext::builder()
                .maybe_correlation_id(Some("c-1".into()))
                .maybe_causation_id(Some("cause-1".into()))
                .maybe_actor_type(Some("user".into()))
                .maybe_actor_id(Some("u-actor".into()))
                .maybe_tenant_id(Some("t-1".into()))
                .build(),
        );

        let ser = serialize_events(&[env.clone()]).unwrap();
        assert_eq!(ser.len(), 1);
        assert_eq!(ser[0].aggregate_id(), "u-1");
        assert_eq!(ser[0].aggregate_type(), User::TYPE);
        assert_eq!(ser[0].event_type(), "UserEvent.Created");
        assert_eq!(ser[0].event_version(), 2);
        // 版本与落盘时间留待存储层赋值
        assert!(ser[0].aggregate_version().is_new());
        assert!(ser[0].recorded_at().is_none());
        assert_eq!(ser[0].correlation_id(), Some("c-1"));
        assert_eq!(ser[0].tenant_id(), Some("t-1"));

        let chain = EventUpcasterChain::default();
        let de = deserialize_events::<User>(&chain, ser).unwrap();
        assert_eq!(de.len(), 1);
        assert_eq!(de[0].payload, env.payload);
        assert_eq!(de[0].event_id, env.event_id);
        assert_eq!(
            de[0].metadata.stream_id().aggregate_id(),
            env.metadata.stream_id().aggregate_id()
        );
    }

    // Upcaster：将旧版本的 Created { username } 升级为 v2 的 Created { name }
    struct CreatedV1ToV2;
    impl EventUpcaster for CreatedV1ToV2 {
        fn applies(&self, event_type: &str, event_version: usize) -> bool {
            event_type == "UserEvent.Created" && event_version == 1
        }
        fn upcast(
            &self,
            event: SerializedEvent,
        ) -> crate::error::DomainResult<EventUpcasterResult> {
            let mut p = event.payload().clone();
            // 形状：{"Created": { username }}
            if let Some(obj) = p.as_object_mut()
                && let Some(inner) = obj.get_mut("Created").and_then(|v| v.as_object_mut())
                && let Some(u) = inner.remove("username")
            {
                inner.insert("name".to_string(), u);
            }
            Ok(EventUpcasterResult::One(
                SerializedEvent::builder()
                    .event_id(event.event_id().to_string())
                    .event_type("UserEvent.Created".to_string())
                    .event_version(2)
                    .aggregate_type(event.aggregate_type().to_string())
                    .aggregate_id(event.aggregate_id().to_string())
                    .aggregate_version(event.aggregate_version())
                    .maybe_tenant_id(event.tenant_id().map(|s| s.to_string()))
                    .maybe_correlation_id(event.correlation_id().map(|s| s.to_string()))
                    .maybe_causation_id(event.causation_id().map(|s| s.to_string()))
                    .maybe_actor_type(event.actor_type().map(|s| s.to_string()))
                    .maybe_actor_id(event.actor_id().map(|s| s.to_string()))
                    .occurred_at(event.occurred_at())
                    .payload(p)
                    .context(event.context().clone())
                    .build(),
            ))
        }
    }

    #[test]
    fn deserialize_with_upcast_compat_legacy_payload() {
        let payload = serde_json::json!({
            "Created": { "username": "alice" }
        });
        let raw = SerializedEvent::builder()
            .event_id(ulid::Ulid::new().to_string())
            .event_type("UserEvent.Created".to_string())
            .event_version(1)
            .aggregate_type("user".to_string())
            .aggregate_id("u-2".to_string())
            .aggregate_version(Version::from_value(1))
            .maybe_correlation_id(Some("c-legacy".into()))
            .maybe_causation_id(Some("cause-legacy".into()))
            .occurred_at(Utc::now())
            .payload(payload)
            .context(
                serde_json::to_value(
                    EventContext::builder()
                        .maybe_correlation_id(Some("c-legacy".into()))
                        .maybe_causation_id(Some("cause-legacy".into()))
                        .build(),
                )
                .expect("serialize EventContext"),
            )
            .build();

        let chain: EventUpcasterChain = vec![Arc::new(CreatedV1ToV2) as Arc<dyn EventUpcaster>]
            .into_iter()
            .collect();
        let out = deserialize_events::<User>(&chain, vec![raw]).unwrap();
        assert_eq!(out.len(), 1);
        match &out[0].payload {
            UserEvent::Created { name } => assert_eq!(name, "alice"),
        }
    }

    #[test]
    fn mismatched_aggregate_type_fails_decoding() {
        let raw = SerializedEvent::builder()
            .event_id(ulid::Ulid::new().to_string())
            .event_type("UserEvent.Created".to_string())
            .event_version(2)
            .aggregate_type("order".to_string())
            .aggregate_id("o-1".to_string())
            .occurred_at(Utc::now())
            .payload(serde_json::json!({ "Created": { "name": "alice" } }))
            .context(serde_json::json!({}))
            .build();

        let chain = EventUpcasterChain::default();
        let err = deserialize_events::<User>(&chain, vec![raw]).unwrap_err();
        match err {
            DomainError::TypeMismatch { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn snapshot_serde_and_type_check() {
        let mut u = <User as Entity>::new("u-1".to_string());
        u.set_version(Version::from_value(7));
        let snap = SerializedSnapshot::from_aggregate(&u, Some("t-1")).unwrap();
        assert_eq!(snap.aggregate_id(), "u-1");
        assert_eq!(snap.aggregate_type(), User::TYPE);
        assert_eq!(snap.aggregate_version().value(), 7);
        assert_eq!(snap.tenant_id(), Some("t-1"));

        let restored: User = snap.to_aggregate().unwrap();
        assert_eq!(restored.id(), u.id());
        assert_eq!(restored.version().value(), 7);

        // 类型不匹配应报错
        #[entity]
        #[derive(Debug, Clone, Default, Serialize, Deserialize)]
        struct Order {}
        impl Aggregate for Order {
            const TYPE: &'static str = "order";
            type Command = ();
            type Event = UserEvent;
            type Error = DomainError;
            fn execute(&self, _c: Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
                Ok(vec![])
            }
            fn apply(&mut self, _e: &Self::Event) {}
        }

        let err = snap.to_aggregate::<Order>().unwrap_err();
        match err {
            DomainError::TypeMismatch { .. } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn snapshot_policy_should_snapshot() {
        let none = Version::new();
        assert!(!SnapshotPolicy::Never.should_snapshot(none, Version::from_value(100)));

        // 单事件推进：等价于整除判断
        for v in 1..=9usize {
            let should =
                SnapshotPolicy::Every(3).should_snapshot(Version::from_value(v - 1), v.into());
            assert_eq!(should, v % 3 == 0);
        }

        // 批量推进：跨过边界即触发
        let policy = SnapshotPolicy::Every(100);
        assert!(policy.should_snapshot(Version::from_value(98), Version::from_value(103)));
        assert!(!policy.should_snapshot(Version::from_value(101), Version::from_value(150)));
        assert!(policy.should_snapshot(Version::from_value(199), Version::from_value(400)));
    }

    #[test]
    fn snapshot_policy_default_interval() {
        assert_eq!(
            SnapshotPolicy::default(),
            SnapshotPolicy::Every(DEFAULT_SNAPSHOT_INTERVAL)
        );
    }
}
