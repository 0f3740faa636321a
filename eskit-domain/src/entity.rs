//! 实体（Entity）基础抽象
//!
//! 为聚合与实体提供统一的标识（Id）与版本（optimistic locking）能力。
//! `version` 表示已持久化的聚合版本：业务操作不推进它，
//! 只有重放与仓储记账（`set_version`）会更新。
//!
use crate::value_object::Version;
use std::{fmt::Display, str::FromStr};

/// 具备唯一标识与版本的实体抽象
pub trait Entity: Send + Sync {
    /// 实体标识类型，要求可解析、可显示与可克隆
    type Id: FromStr + Clone + Display + Send + Sync;

    /// 使用给定标识创建实体（聚合），版本为初始值
    fn new(id: Self::Id) -> Self;

    /// 获取实体标识
    fn id(&self) -> &Self::Id;

    /// 获取当前已持久化版本（用于乐观锁与并发控制）
    fn version(&self) -> Version;

    /// 设置已持久化版本（仅供重放与仓储记账使用）
    fn set_version(&mut self, version: Version);
}
