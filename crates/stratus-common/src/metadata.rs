//! 注解与标签常量
//!
//! 这些键是与集群中其他工具约定的线上契约，不可随意修改。

/// 平台 API 组
pub const PLATFORM_GROUP: &str = "platform.stratus.io";

/// CRD 等平台级资源使用的固定字段所有者
pub const PLATFORM_FIELD_OWNER: &str = "platform.stratus.io";

/// 托管标记注解，取值 "true" / "false"
pub const ANNOTATION_MANAGED: &str = "platform.stratus.io/managed";
/// 实例代数
pub const ANNOTATION_INSTANCE_GENERATION: &str = "platform.stratus.io/instance.generation";
/// 实例名称
pub const ANNOTATION_INSTANCE_NAME: &str = "platform.stratus.io/instance.name";
/// 实例 UID
pub const ANNOTATION_INSTANCE_UID: &str = "platform.stratus.io/instance.uid";
/// 平台类型
pub const ANNOTATION_PLATFORM_TYPE: &str = "platform.stratus.io/type";
/// 平台版本
pub const ANNOTATION_PLATFORM_VERSION: &str = "platform.stratus.io/version";
/// 组件 CR 上记录的管理状态
pub const ANNOTATION_MANAGEMENT_STATE: &str = "component.platform.stratus.io/management-state";

/// 归属标签
pub const LABEL_PART_OF: &str = "platform.stratus.io/part-of";
/// 平台级资源通用标签
pub const LABEL_PLATFORM: &str = "platform.stratus.io/platform";

/// 托管标记的取值
pub const MANAGED_TRUE: &str = "true";
/// 非托管标记的取值
pub const MANAGED_FALSE: &str = "false";
