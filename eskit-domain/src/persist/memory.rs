//! 内存后端（参考实现）
//!
//! 面向测试、示例与本地开发的线程安全内存实现，完整覆盖仓储协议：
//! 条件追加在单个写锁内完成（整批要么全部可见要么全部不可见），
//! 读取按页惰性产出，快照留存在写入后就地清理。
//! 锁从不跨越 await 点，持有时间仅限拷贝一页数据。
//!
use crate::{
    error::{DomainError, DomainResult},
    persist::{
        DEFAULT_SNAPSHOT_RETAIN, EventRepository, EventStream, SerializedEvent,
        SerializedSnapshot, SnapshotRepository,
    },
    value_object::{StreamId, Version},
};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::{TryStreamExt, stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

/// 默认读取页大小
const DEFAULT_READ_PAGE: usize = 256;

#[derive(Default)]
struct StreamState {
    version: Version,
    events: Vec<SerializedEvent>,
}

/// 内存事件仓储
#[derive(Clone)]
pub struct InMemoryEventRepository {
    inner: Arc<RwLock<HashMap<String, StreamState>>>,
    page_size: usize,
}

impl Default for InMemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_READ_PAGE)
    }

    /// 指定惰性读取的页大小（仅影响拉取粒度，不影响语义）
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn append(
        &self,
        stream_id: &StreamId,
        events: Vec<SerializedEvent>,
        expected_version: Version,
    ) -> DomainResult<Version> {
        if events.is_empty() {
            return Err(DomainError::invalid_command("empty event batch"));
        }

        let key = stream_id.to_string();
        let mut inner = self.inner.write().expect("event store lock poisoned");

        let current = inner
            .get(&key)
            .map(|state| state.version)
            .unwrap_or_default();
        if current != expected_version {
            return Err(DomainError::VersionConflict {
                expected: expected_version,
                actual: current,
            });
        }

        // 版本与落盘时间由存储层赋值；整批在同一把写锁内落地
        let recorded_at = Utc::now();
        let state = inner.entry(key).or_default();
        let mut version = expected_version;
        for event in events {
            version = version.next();
            state.events.push(
                event
                    .with_aggregate_version(version)
                    .with_recorded_at(recorded_at),
            );
        }
        state.version = version;

        Ok(version)
    }

    async fn read_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> DomainResult<EventStream> {
        let inner = Arc::clone(&self.inner);
        let key = stream_id.to_string();
        let page_size = self.page_size;

        let start = if from_version.is_new() {
            Version::from_value(1)
        } else {
            from_version
        };

        // 按页重查：每页结束后基于最后一个版本继续，序列可随时丢弃
        let paged = stream::try_unfold(start, move |cursor| {
            let inner = Arc::clone(&inner);
            let key = key.clone();
            async move {
                let page: Vec<SerializedEvent> = {
                    let guard = inner.read().expect("event store lock poisoned");
                    guard
                        .get(&key)
                        .map(|state| {
                            state
                                .events
                                .iter()
                                .filter(|e| e.aggregate_version() >= cursor)
                                .take(page_size)
                                .cloned()
                                .collect()
                        })
                        .unwrap_or_default()
                };

                match page.last().map(SerializedEvent::aggregate_version) {
                    None => Ok::<_, DomainError>(None),
                    Some(last) => Ok(Some((
                        stream::iter(page.into_iter().map(Ok)),
                        last.next(),
                    ))),
                }
            }
        })
        .try_flatten();

        Ok(Box::pin(paged))
    }

    async fn current_version(&self, stream_id: &StreamId) -> DomainResult<Version> {
        let inner = self.inner.read().expect("event store lock poisoned");
        Ok(inner
            .get(&stream_id.to_string())
            .map(|state| state.version)
            .unwrap_or_default())
    }
}

/// 内存快照仓储
#[derive(Clone)]
pub struct InMemorySnapshotRepository {
    inner: Arc<RwLock<HashMap<String, BTreeMap<usize, SerializedSnapshot>>>>,
    retain: usize,
}

impl Default for InMemorySnapshotRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::with_retain(DEFAULT_SNAPSHOT_RETAIN)
    }

    /// 指定每个流保留的快照数量
    pub fn with_retain(retain: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            retain: retain.max(1),
        }
    }
}

#[async_trait]
impl SnapshotRepository for InMemorySnapshotRepository {
    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        up_to: Option<Version>,
    ) -> DomainResult<Option<SerializedSnapshot>> {
        let inner = self.inner.read().expect("snapshot store lock poisoned");
        let Some(snapshots) = inner.get(&stream_id.to_string()) else {
            return Ok(None);
        };

        let found = match up_to {
            None => snapshots.last_key_value(),
            Some(version) => snapshots.range(..=version.value()).next_back(),
        };

        Ok(found.map(|(_, snapshot)| snapshot.clone()))
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> DomainResult<()> {
        let key = snapshot.stream_id().to_string();
        let version = snapshot.aggregate_version().value();

        let mut inner = self.inner.write().expect("snapshot store lock poisoned");
        let snapshots = inner.entry(key).or_default();
        snapshots.insert(version, snapshot);

        // 留存清理：只保留最近 retain 个
        while snapshots.len() > self.retain {
            snapshots.pop_first();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::EventRepositoryExt;
    use futures_util::StreamExt;

    fn mk_event(stream: &StreamId, seq: usize) -> SerializedEvent {
        SerializedEvent::builder()
            .event_id(ulid::Ulid::new().to_string())
            .event_type("TestEvent.Ticked".to_string())
            .event_version(1)
            .aggregate_type(stream.aggregate_type().to_string())
            .aggregate_id(stream.aggregate_id().to_string())
            .maybe_tenant_id(Some("t-1".into()))
            .occurred_at(Utc::now())
            .payload(serde_json::json!({ "seq": seq }))
            .context(serde_json::json!({}))
            .build()
    }

    fn mk_snapshot(stream: &StreamId, version: usize) -> SerializedSnapshot {
        SerializedSnapshot::builder()
            .aggregate_type(stream.aggregate_type().to_string())
            .aggregate_id(stream.aggregate_id().to_string())
            .aggregate_version(Version::from_value(version))
            .maybe_tenant_id(Some("t-1".into()))
            .payload(serde_json::json!({ "at": version }))
            .created_at(Utc::now())
            .build()
    }

    #[tokio::test]
    async fn append_assigns_contiguous_versions_and_recorded_at() {
        let repo = InMemoryEventRepository::new();
        let stream = StreamId::new("tenant", "t1");

        let batch = vec![mk_event(&stream, 1), mk_event(&stream, 2)];
        let version = repo.append(&stream, batch, Version::new()).await.unwrap();
        assert_eq!(version.value(), 2);

        let events = repo
            .collect_from(&stream, Version::new(), None)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].aggregate_version().value(), 1);
        assert_eq!(events[1].aggregate_version().value(), 2);
        assert!(events.iter().all(|e| e.recorded_at().is_some()));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_without_partial_write() {
        let repo = InMemoryEventRepository::new();
        let stream = StreamId::new("tenant", "t1");

        repo.append(&stream, vec![mk_event(&stream, 1)], Version::new())
            .await
            .unwrap();

        let err = repo
            .append(
                &stream,
                vec![mk_event(&stream, 2), mk_event(&stream, 3)],
                Version::new(),
            )
            .await
            .unwrap_err();
        match err {
            DomainError::VersionConflict { expected, actual } => {
                assert_eq!(expected.value(), 0);
                assert_eq!(actual.value(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }

        // 失败的整批不可见
        let events = repo
            .collect_from(&stream, Version::new(), None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(repo.current_version(&stream).await.unwrap().value(), 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let repo = InMemoryEventRepository::new();
        let stream = StreamId::new("tenant", "t1");
        let err = repo.append(&stream, vec![], Version::new()).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidCommand { .. }));
    }

    #[tokio::test]
    async fn read_from_pages_lazily_and_in_order() {
        // 页大小 3，写入 10 个事件，验证跨页顺序与起始位点
        let repo = InMemoryEventRepository::with_page_size(3);
        let stream = StreamId::new("tenant", "t1");

        let batch: Vec<_> = (1..=10).map(|i| mk_event(&stream, i)).collect();
        repo.append(&stream, batch, Version::new()).await.unwrap();

        let versions: Vec<usize> = repo
            .collect_from(&stream, Version::from_value(4), None)
            .await
            .unwrap()
            .iter()
            .map(|e| e.aggregate_version().value())
            .collect();
        assert_eq!(versions, (4..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dropped_stream_reads_have_no_side_effects() {
        let repo = InMemoryEventRepository::with_page_size(2);
        let stream = StreamId::new("tenant", "t1");

        let batch: Vec<_> = (1..=6).map(|i| mk_event(&stream, i)).collect();
        repo.append(&stream, batch, Version::new()).await.unwrap();

        // 只取第一个事件后丢弃流
        let mut s = repo.read_from(&stream, Version::new()).await.unwrap();
        let first = s.next().await.unwrap().unwrap();
        assert_eq!(first.aggregate_version().value(), 1);
        drop(s);

        assert_eq!(repo.current_version(&stream).await.unwrap().value(), 6);
    }

    #[tokio::test]
    async fn unknown_stream_is_empty_at_version_zero() {
        let repo = InMemoryEventRepository::new();
        let stream = StreamId::new("tenant", "missing");

        assert!(repo.current_version(&stream).await.unwrap().is_new());
        let events = repo
            .collect_from(&stream, Version::new(), None)
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn snapshot_lookup_latest_and_at_or_before() {
        let repo = InMemorySnapshotRepository::new();
        let stream = StreamId::new("tenant", "t1");

        for v in [100, 200, 300] {
            repo.save_snapshot(mk_snapshot(&stream, v)).await.unwrap();
        }

        let latest = repo.get_snapshot(&stream, None).await.unwrap().unwrap();
        assert_eq!(latest.aggregate_version().value(), 300);

        let at = repo
            .get_snapshot(&stream, Some(Version::from_value(250)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at.aggregate_version().value(), 200);

        let none = repo
            .get_snapshot(&stream, Some(Version::from_value(99)))
            .await
            .unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn snapshot_retention_keeps_most_recent() {
        let repo = InMemorySnapshotRepository::with_retain(3);
        let stream = StreamId::new("tenant", "t1");

        for v in [100, 200, 300, 400, 500] {
            repo.save_snapshot(mk_snapshot(&stream, v)).await.unwrap();
        }

        // 最老的两个被清理
        assert!(
            repo.get_snapshot(&stream, Some(Version::from_value(299)))
                .await
                .unwrap()
                .is_none()
        );
        let latest = repo.get_snapshot(&stream, None).await.unwrap().unwrap();
        assert_eq!(latest.aggregate_version().value(), 500);
        let oldest_kept = repo
            .get_snapshot(&stream, Some(Version::from_value(300)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(oldest_kept.aggregate_version().value(), 300);
    }
}
