//! eskit 过程宏
//!
//! - `#[entity]`：为聚合/实体结构体追加 `id`/`version` 字段并实现
//!   `::eskit_domain::entity::Entity`；
//! - `#[event]`：为领域事件枚举补齐必要派生并实现
//!   `::eskit_domain::domain_event::DomainEvent`（支持按变体覆写类型标签与版本）。
//!
use proc_macro::TokenStream;

mod entity;
mod event;
mod utils;

/// 实体宏
/// - 追加字段：`id: IdType`、`version: Version`（若缺失），并置于字段最前
/// - 自动实现 `Entity`（`new/id/version/set_version`）
/// - 支持参数：`#[entity(id = IdType)]`，默认 `String`
#[proc_macro_attribute]
pub fn entity(attr: TokenStream, item: TokenStream) -> TokenStream {
    entity::expand(attr, item)
}

/// 领域事件宏
/// - 补齐派生：Debug, Clone, PartialEq, Serialize, Deserialize
/// - 生成 `DomainEvent` 实现（`event_type`/`event_version`）
/// - 枚举级默认版本：`#[event(version = N)]`（默认 1）
/// - 变体可覆写：`#[event(event_type = "...", event_version = N)]`
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
