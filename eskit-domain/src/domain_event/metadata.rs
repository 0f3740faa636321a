use crate::value_object::StreamId;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 元数据：事件所属的流与业务发生时间
#[derive(Builder, Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    stream_id: StreamId,
    occurred_at: DateTime<Utc>,
}

impl Metadata {
    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn occurred_at(&self) -> &DateTime<Utc> {
        &self.occurred_at
    }
}
