//! 事件溯源持久化基础库（eskit-domain）
//!
//! 面向“单流单写者”的聚合持久化协议，提供：
//! - 聚合（`aggregate`）与实体（`entity`）抽象；
//! - 领域事件（`domain_event`）与事件上抬（`event_upcaster`）;
//! - 以追加日志 + 快照为基础的仓储协议与组合实现（`persist`）：
//!   乐观并发追加、惰性区间读取、快照留存策略与历史版本重建；
//! - 内存后端（`persist::memory`）与可选的 Postgres 后端
//!   （`persist::postgres`，特性 `infra-sqlx`）。
//!
//! 设计取向：事件日志是唯一权威，快照只是重放加速；版本由存储层在追加时
//! 赋值；并发冲突由存储层的条件写入裁决，库内不做任何进程内锁。
//!
//! 典型用法：
//! 1. 定义聚合、命令与事件，实现 `Aggregate` 上的 `execute/apply`；
//! 2. 选择事件/快照仓储后端（内存或 Postgres），装配
//!    `SnapshottingRepository` 或 `EventSourcedRepository`；
//! 3. 通过 `AggregateRoot` 编排一条命令到事件持久化的完整流程。
//!
pub mod aggregate;
pub mod aggregate_root;
pub mod domain_event;
pub mod entity;
pub mod error;
pub mod event_upcaster;
pub mod persist;
pub mod value_object;

// 允许在本 crate 内部通过 ::eskit_domain 进行自引用，
// 以便过程宏在本 crate 的测试中也能解析到 ::eskit_domain 路径。
extern crate self as eskit_domain;
