//! Stratus Common - 跨模块共享工具与数据结构
//!
//! 该模块提供 Stratus 平台 Operator 中各组件共享的数据结构、错误处理和工具函数。
//! 包括 GVK、状态条件等数据模型，资源哈希与注解访问器，以及统一的错误处理机制。

pub mod error;
pub mod metadata;
pub mod models;
pub mod resources;

/// 重新导出常用类型，方便使用
pub use error::Error;
pub use error::Result;
pub use models::conditions::*;
pub use models::gvk::{self, Gvk};
