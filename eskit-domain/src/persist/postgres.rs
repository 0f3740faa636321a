//! Postgres 后端（特性 `infra-sqlx`）
//!
//! 以事务内的条件写入实现乐观并发：
//! - 流头表 `es_streams` 记录每条流的当前版本，追加时对其行加锁校验；
//! - 事件表 `es_events` 以 `(聚合类型, 聚合ID, 版本)` 唯一索引兜底并发竞争；
//! - 快照表 `es_snapshots` 按版本保留最近 N 个，清理在后台任务中进行。
//! 连接层故障映射为瞬时错误（`StorageUnavailable`），由调用方退避重试。
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
use chrono::{DateTime, Utc};
use futures_util::{TryStreamExt, stream};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};

/// 默认读取页大小
const DEFAULT_READ_PAGE: i64 = 256;

/// Postgres 事件仓储
#[derive(Clone)]
pub struct PgEventRepository {
    pool: PgPool,
    page_size: i64,
}

impl PgEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            page_size: DEFAULT_READ_PAGE,
        }
    }

    pub fn with_page_size(pool: PgPool, page_size: i64) -> Self {
        Self {
            pool,
            page_size: page_size.max(1),
        }
    }

    /// 应用事件日志相关的表结构（幂等，可在启动时执行）
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_streams (
                aggregate_type  TEXT NOT NULL,
                aggregate_id    TEXT NOT NULL,
                current_version BIGINT NOT NULL,
                PRIMARY KEY (aggregate_type, aggregate_id)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_events (
                event_id          TEXT NOT NULL PRIMARY KEY,
                event_type        TEXT NOT NULL,
                event_version     BIGINT NOT NULL,
                aggregate_type    TEXT NOT NULL,
                aggregate_id      TEXT NOT NULL,
                aggregate_version BIGINT NOT NULL,
                tenant_id         TEXT,
                correlation_id    TEXT,
                causation_id      TEXT,
                actor_type        TEXT,
                actor_id          TEXT,
                occurred_at       TIMESTAMPTZ NOT NULL,
                recorded_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
                payload           JSONB NOT NULL,
                context           JSONB NOT NULL,
                UNIQUE (aggregate_type, aggregate_id, aggregate_version)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn append(
        &self,
        stream_id: &StreamId,
        events: Vec<SerializedEvent>,
        expected_version: Version,
    ) -> DomainResult<Version> {
        if events.is_empty() {
            return Err(DomainError::invalid_command("empty event batch"));
        }

        let mut tx = self.pool.begin().await?;

        // 确保流头行存在，再对其加行锁串行化同流写入
        sqlx::query(
            r"
            INSERT INTO es_streams (aggregate_type, aggregate_id, current_version)
            VALUES ($1, $2, 0)
            ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING
            ",
        )
        .bind(stream_id.aggregate_type())
        .bind(stream_id.aggregate_id())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r"
            SELECT current_version FROM es_streams
            WHERE aggregate_type = $1 AND aggregate_id = $2
            FOR UPDATE
            ",
        )
        .bind(stream_id.aggregate_type())
        .bind(stream_id.aggregate_id())
        .fetch_one(&mut *tx)
        .await?;

        let current: i64 = row.try_get("current_version")?;
        let current = Version::from_value(usize::try_from(current)?);

        if current != expected_version {
            // 事务随 drop 回滚，无部分写入
            return Err(DomainError::VersionConflict {
                expected: expected_version,
                actual: current,
            });
        }

        let recorded_at = Utc::now();
        let mut version = expected_version;
        let stamped: Vec<SerializedEvent> = events
            .into_iter()
            .map(|event| {
                version = version.next();
                event
                    .with_aggregate_version(version)
                    .with_recorded_at(recorded_at)
            })
            .collect();

        let mut rows = Vec::with_capacity(stamped.len());
        for event in &stamped {
            rows.push(EventInsertRow::try_from(event)?);
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO es_events (event_id, event_type, event_version, aggregate_type, \
             aggregate_id, aggregate_version, tenant_id, correlation_id, causation_id, \
             actor_type, actor_id, occurred_at, recorded_at, payload, context) ",
        );
        qb.push_values(rows, |mut b, row| {
            b.push_bind(row.event_id);
            b.push_bind(row.event_type);
            b.push_bind(row.event_version);
            b.push_bind(row.aggregate_type);
            b.push_bind(row.aggregate_id);
            b.push_bind(row.aggregate_version);
            b.push_bind(row.tenant_id);
            b.push_bind(row.correlation_id);
            b.push_bind(row.causation_id);
            b.push_bind(row.actor_type);
            b.push_bind(row.actor_id);
            b.push_bind(row.occurred_at);
            b.push_bind(row.recorded_at);
            b.push_bind(row.payload);
            b.push_bind(row.context);
        });

        if let Err(err) = qb.build().execute(&mut *tx).await {
            // 唯一索引兜底：并发竞争下版本撞车视作冲突
            if is_unique_violation(&err) {
                drop(tx);
                let actual = self.current_version(stream_id).await.unwrap_or_default();
                return Err(DomainError::VersionConflict {
                    expected: expected_version,
                    actual,
                });
            }
            return Err(err.into());
        }

        sqlx::query(
            r"
            UPDATE es_streams SET current_version = $1
            WHERE aggregate_type = $2 AND aggregate_id = $3
            ",
        )
        .bind(i64::try_from(version.value())?)
        .bind(stream_id.aggregate_type())
        .bind(stream_id.aggregate_id())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(version)
    }

    async fn read_from(
        &self,
        stream_id: &StreamId,
        from_version: Version,
    ) -> DomainResult<EventStream> {
        let pool = self.pool.clone();
        let page_size = self.page_size;
        let aggregate_type = stream_id.aggregate_type().to_string();
        let aggregate_id = stream_id.aggregate_id().to_string();

        let start = if from_version.is_new() {
            Version::from_value(1)
        } else {
            from_version
        };

        // 键集分页：每页按版本区间重查，可从任意位点重启
        let paged = stream::try_unfold(start, move |cursor| {
            let pool = pool.clone();
            let aggregate_type = aggregate_type.clone();
            let aggregate_id = aggregate_id.clone();
            async move {
                let rows: Vec<EventRow> = sqlx::query_as(
                    r"
                    SELECT event_id, event_type, event_version, aggregate_type, aggregate_id,
                           aggregate_version, tenant_id, correlation_id, causation_id,
                           actor_type, actor_id, occurred_at, recorded_at, payload, context
                    FROM es_events
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND aggregate_version >= $3
                    ORDER BY aggregate_version ASC
                    LIMIT $4
                    ",
                )
                .bind(&aggregate_type)
                .bind(&aggregate_id)
                .bind(i64::try_from(cursor.value())?)
                .bind(page_size)
                .fetch_all(&pool)
                .await?;

                if rows.is_empty() {
                    return Ok::<_, DomainError>(None);
                }

                let mut page = Vec::with_capacity(rows.len());
                for row in rows {
                    page.push(SerializedEvent::try_from(row)?);
                }

                let next = page
                    .last()
                    .map(SerializedEvent::aggregate_version)
                    .unwrap_or(cursor)
                    .next();

                Ok(Some((stream::iter(page.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten();

        Ok(Box::pin(paged))
    }

    async fn current_version(&self, stream_id: &StreamId) -> DomainResult<Version> {
        let row = sqlx::query(
            r"
            SELECT current_version FROM es_streams
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ",
        )
        .bind(stream_id.aggregate_type())
        .bind(stream_id.aggregate_id())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            None => Ok(Version::new()),
            Some(row) => {
                let current: i64 = row.try_get("current_version")?;
                Ok(Version::from_value(usize::try_from(current)?))
            }
        }
    }
}

/// Postgres 快照仓储
#[derive(Clone)]
pub struct PgSnapshotRepository {
    pool: PgPool,
    retain: i64,
}

impl PgSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retain: DEFAULT_SNAPSHOT_RETAIN as i64,
        }
    }

    pub fn with_retain(pool: PgPool, retain: usize) -> Self {
        Self {
            pool,
            retain: i64::try_from(retain.max(1)).unwrap_or(DEFAULT_SNAPSHOT_RETAIN as i64),
        }
    }

    /// 应用快照表结构（幂等，可在启动时执行）
    pub async fn migrate(&self) -> DomainResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS es_snapshots (
                aggregate_type    TEXT NOT NULL,
                aggregate_id      TEXT NOT NULL,
                aggregate_version BIGINT NOT NULL,
                tenant_id         TEXT,
                payload           JSONB NOT NULL,
                created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (aggregate_type, aggregate_id, aggregate_version)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS es_snapshots_latest
            ON es_snapshots (aggregate_type, aggregate_id, created_at DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for PgSnapshotRepository {
    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        up_to: Option<Version>,
    ) -> DomainResult<Option<SerializedSnapshot>> {
        let row: Option<SnapshotRow> = match up_to {
            None => {
                sqlx::query_as(
                    r"
                    SELECT aggregate_type, aggregate_id, aggregate_version, tenant_id,
                           payload, created_at
                    FROM es_snapshots
                    WHERE aggregate_type = $1 AND aggregate_id = $2
                    ORDER BY aggregate_version DESC
                    LIMIT 1
                    ",
                )
                .bind(stream_id.aggregate_type())
                .bind(stream_id.aggregate_id())
                .fetch_optional(&self.pool)
                .await?
            }
            Some(version) => {
                sqlx::query_as(
                    r"
                    SELECT aggregate_type, aggregate_id, aggregate_version, tenant_id,
                           payload, created_at
                    FROM es_snapshots
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND aggregate_version <= $3
                    ORDER BY aggregate_version DESC
                    LIMIT 1
                    ",
                )
                .bind(stream_id.aggregate_type())
                .bind(stream_id.aggregate_id())
                .bind(i64::try_from(version.value())?)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(SerializedSnapshot::try_from).transpose()
    }

    async fn save_snapshot(&self, snapshot: SerializedSnapshot) -> DomainResult<()> {
        let version = i64::try_from(snapshot.aggregate_version().value())?;

        // 与事件日志同库：拒绝逻辑上超前于日志的快照
        let head = sqlx::query(
            r"
            SELECT current_version FROM es_streams
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ",
        )
        .bind(snapshot.aggregate_type())
        .bind(snapshot.aggregate_id())
        .fetch_optional(&self.pool)
        .await?;

        let head: i64 = match head {
            Some(row) => row.try_get("current_version")?,
            None => 0,
        };
        if version > head {
            return Err(DomainError::invalid_state(format!(
                "snapshot v{version} is ahead of stream head v{head}"
            )));
        }

        sqlx::query(
            r"
            INSERT INTO es_snapshots
                (aggregate_type, aggregate_id, aggregate_version, tenant_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (aggregate_type, aggregate_id, aggregate_version)
            DO UPDATE SET tenant_id = EXCLUDED.tenant_id,
                          payload = EXCLUDED.payload,
                          created_at = EXCLUDED.created_at
            ",
        )
        .bind(snapshot.aggregate_type())
        .bind(snapshot.aggregate_id())
        .bind(version)
        .bind(snapshot.tenant_id())
        .bind(sqlx::types::Json(snapshot.payload().clone()))
        .bind(snapshot.created_at())
        .execute(&self.pool)
        .await?;

        // 留存清理异步执行：失败只记日志，不影响快照写入
        let pool = self.pool.clone();
        let retain = self.retain;
        let aggregate_type = snapshot.aggregate_type().to_string();
        let aggregate_id = snapshot.aggregate_id().to_string();
        tokio::spawn(async move {
            if let Err(err) = prune_snapshots(&pool, &aggregate_type, &aggregate_id, retain).await {
                tracing::warn!(
                    aggregate_type = %aggregate_type,
                    aggregate_id = %aggregate_id,
                    error = %err,
                    "snapshot retention cleanup failed",
                );
            }
        });

        Ok(())
    }
}

async fn prune_snapshots(
    pool: &PgPool,
    aggregate_type: &str,
    aggregate_id: &str,
    retain: i64,
) -> DomainResult<()> {
    sqlx::query(
        r"
        DELETE FROM es_snapshots
        WHERE aggregate_type = $1 AND aggregate_id = $2
          AND aggregate_version NOT IN (
            SELECT aggregate_version FROM es_snapshots
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version DESC
            LIMIT $3
          )
        ",
    )
    .bind(aggregate_type)
    .bind(aggregate_id)
    .bind(retain)
    .execute(pool)
    .await?;

    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

// ---- 行模型与转换 ----

struct EventInsertRow {
    event_id: String,
    event_type: String,
    event_version: i64,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: i64,
    tenant_id: Option<String>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    actor_type: Option<String>,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    payload: sqlx::types::Json<serde_json::Value>,
    context: sqlx::types::Json<serde_json::Value>,
}

impl TryFrom<&SerializedEvent> for EventInsertRow {
    type Error = DomainError;

    fn try_from(event: &SerializedEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            event_id: event.event_id().to_string(),
            event_type: event.event_type().to_string(),
            event_version: i64::try_from(event.event_version())?,
            aggregate_type: event.aggregate_type().to_string(),
            aggregate_id: event.aggregate_id().to_string(),
            aggregate_version: i64::try_from(event.aggregate_version().value())?,
            tenant_id: event.tenant_id().map(|s| s.to_string()),
            correlation_id: event.correlation_id().map(|s| s.to_string()),
            causation_id: event.causation_id().map(|s| s.to_string()),
            actor_type: event.actor_type().map(|s| s.to_string()),
            actor_id: event.actor_id().map(|s| s.to_string()),
            occurred_at: event.occurred_at(),
            recorded_at: event.recorded_at().unwrap_or_else(Utc::now),
            payload: sqlx::types::Json(event.payload().clone()),
            context: sqlx::types::Json(event.context().clone()),
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    event_type: String,
    event_version: i64,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: i64,
    tenant_id: Option<String>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    actor_type: Option<String>,
    actor_id: Option<String>,
    occurred_at: DateTime<Utc>,
    recorded_at: DateTime<Utc>,
    payload: serde_json::Value,
    context: serde_json::Value,
}

impl TryFrom<EventRow> for SerializedEvent {
    type Error = DomainError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(SerializedEvent::builder()
            .event_id(row.event_id)
            .event_type(row.event_type)
            .event_version(usize::try_from(row.event_version)?)
            .aggregate_type(row.aggregate_type)
            .aggregate_id(row.aggregate_id)
            .aggregate_version(Version::from_value(usize::try_from(row.aggregate_version)?))
            .maybe_tenant_id(row.tenant_id)
            .maybe_correlation_id(row.correlation_id)
            .maybe_causation_id(row.causation_id)
            .maybe_actor_type(row.actor_type)
            .maybe_actor_id(row.actor_id)
            .occurred_at(row.occurred_at)
            .recorded_at(row.recorded_at)
            .payload(row.payload)
            .context(row.context)
            .build())
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: i64,
    tenant_id: Option<String>,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for SerializedSnapshot {
    type Error = DomainError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(SerializedSnapshot::builder()
            .aggregate_type(row.aggregate_type)
            .aggregate_id(row.aggregate_id)
            .aggregate_version(Version::from_value(usize::try_from(row.aggregate_version)?))
            .maybe_tenant_id(row.tenant_id)
            .payload(row.payload)
            .created_at(row.created_at)
            .build())
    }
}
