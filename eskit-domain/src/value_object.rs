//! 值对象（Value Object）
//!
//! 无标识、以值相等为准的对象：聚合版本号与流标识。
//!
use crate::aggregate::Aggregate;
use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 版本号（用于乐观锁和并发控制）
///
/// 语义上表示聚合“已持久化”的版本：0 表示流尚不存在，
/// 追加成功后由存储层按 `expected+1..=expected+n` 连续赋值。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(usize);

impl Version {
    /// 创建初始版本（版本号为 0）
    pub const fn new() -> Self {
        Self(0)
    }

    /// 从值创建版本号
    pub const fn from_value(value: usize) -> Self {
        Self(value)
    }

    /// 获取下一个版本号
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// 获取版本号的值
    pub const fn value(&self) -> usize {
        self.0
    }

    /// 检查是否为初始版本（流尚不存在）
    pub fn is_new(&self) -> bool {
        self.0 == 0
    }

    /// 检查聚合是否已创建（版本大于零）
    pub fn is_created(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<usize> for Version {
    fn from(value: usize) -> Self {
        Self::from_value(value)
    }
}

impl From<Version> for usize {
    fn from(version: Version) -> Self {
        version.value()
    }
}

/// 流标识：`聚合类型:聚合ID` 的复合键，标识一条追加日志分区
///
/// 同一流内版本从 1 起连续递增；跨流之间不提供任何顺序保证。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    aggregate_type: String,
    aggregate_id: String,
}

impl StreamId {
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }

    /// 由聚合类型标签与聚合 ID 构造流标识
    pub fn for_aggregate<A: Aggregate>(aggregate_id: &A::Id) -> Self {
        Self::new(A::TYPE, aggregate_id.to_string())
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.aggregate_type, self.aggregate_id)
    }
}

impl FromStr for StreamId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((aggregate_type, aggregate_id))
                if !aggregate_type.is_empty() && !aggregate_id.is_empty() =>
            {
                Ok(Self::new(aggregate_type, aggregate_id))
            }
            _ => Err(DomainError::InvalidAggregateId(s.to_string())),
        }
    }
}
