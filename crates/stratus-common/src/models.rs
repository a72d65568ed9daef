//! 数据模型模块
//!
//! 提供 GVK 与状态条件等跨模块共享的模型。

pub mod conditions;
pub mod gvk;

pub use conditions::{Condition, ConditionStatus};
pub use gvk::Gvk;
