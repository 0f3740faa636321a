use crate::{
    aggregate::Aggregate,
    error::{DomainError, DomainResult as Result},
    value_object::{StreamId, Version},
};
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 聚合状态在某一版本上的持久化快照
///
/// 快照版本必须对应日志中已落盘的某个事件版本，绝不超前于日志。
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct SerializedSnapshot {
    aggregate_type: String,
    aggregate_id: String,
    aggregate_version: Version,
    tenant_id: Option<String>,
    payload: Value,
    created_at: DateTime<Utc>,
}

impl SerializedSnapshot {
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

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 快照所属的流标识
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(self.aggregate_type.clone(), self.aggregate_id.clone())
    }

    /// 将快照反序列化为聚合实例，并以快照记录上的版本为准
    pub fn to_aggregate<A>(&self) -> Result<A>
    where
        A: Aggregate,
    {
        if A::TYPE != self.aggregate_type {
            return Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: self.aggregate_type.clone(),
            });
        }

        let mut aggregate: A = serde_json::from_value(self.payload.clone())?;
        aggregate.set_version(self.aggregate_version);
        Ok(aggregate)
    }

    /// 从聚合实例创建快照
    pub fn from_aggregate<A>(aggregate: &A, tenant_id: Option<&str>) -> Result<Self>
    where
        A: Aggregate,
    {
        Ok(Self {
            aggregate_type: A::TYPE.to_string(),
            aggregate_id: aggregate.id().to_string(),
            aggregate_version: aggregate.version(),
            tenant_id: tenant_id.map(|s| s.to_string()),
            payload: serde_json::to_value(aggregate)?,
            created_at: Utc::now(),
        })
    }
}
