//! 自定义资源定义模块
//!
//! 该模块定义了 Stratus 的顶层自定义资源 Platform。Platform 是集群级资源，
//! 其 spec 描述每个组件的管理状态，status 汇总各组件的调谐结果。

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use stratus_common::Condition;

/// 已就绪阶段
pub const PHASE_READY: &str = "Ready";
/// 未就绪阶段
pub const PHASE_NOT_READY: &str = "Not Ready";
/// 首次调谐前的阶段
pub const PHASE_PROGRESSING: &str = "Progressing";

/// 组件管理状态
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ManagementState {
    /// 由 Operator 安装并持续调谐
    Managed,
    /// 由 Operator 删除
    Removed,
    /// 不做任何处理
    Unmanaged,
    /// 无法识别的取值，原样保留
    Unknown(String),
}

impl Default for ManagementState {
    fn default() -> Self {
        Self::Removed
    }
}

impl From<String> for ManagementState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Managed" => Self::Managed,
            "Removed" => Self::Removed,
            "Unmanaged" => Self::Unmanaged,
            _ => Self::Unknown(value),
        }
    }
}

impl From<ManagementState> for String {
    fn from(value: ManagementState) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ManagementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Managed => f.write_str("Managed"),
            Self::Removed => f.write_str("Removed"),
            Self::Unmanaged => f.write_str("Unmanaged"),
            Self::Unknown(value) => f.write_str(value),
        }
    }
}

/// 发布版本信息
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Release {
    /// 发行版名称
    #[serde(default)]
    pub name: String,
    /// 版本号
    #[serde(default)]
    pub version: String,
}

/// 平台规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "platform.stratus.io", version = "v1", kind = "Platform")]
#[kube(status = "PlatformStatus", shortname = "plat")]
#[kube(printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#)]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
pub struct PlatformSpec {
    /// 按组件名称索引的组件配置
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

/// 单个组件的期望状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// 管理状态：Managed、Removed 或 Unmanaged
    #[serde(default)]
    #[schemars(with = "String")]
    pub management_state: ManagementState,

    /// 覆盖清单参数
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// 组件在平台状态中的记录
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// 调谐时使用的管理状态
    #[serde(default)]
    #[schemars(with = "String")]
    pub management_state: ManagementState,
}

/// 平台状态
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// 阶段：Ready、Not Ready 或 Progressing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// 状态条件
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// 各组件是否已安装
    #[serde(default)]
    pub installed_components: BTreeMap<String, bool>,

    /// 各组件状态
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,

    /// 最近一次调谐所观察到的 generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// 发布版本信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<Release>,
}

impl Platform {
    /// 读取组件的管理状态，未声明的组件视为 Removed
    pub fn management_state(&self, component: &str) -> ManagementState {
        self.spec
            .components
            .get(component)
            .map(|c| c.management_state.clone())
            .unwrap_or_default()
    }

    /// 组件的覆盖参数
    pub fn component_params(&self, component: &str) -> BTreeMap<String, String> {
        self.spec
            .components
            .get(component)
            .map(|c| c.params.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_state_serde() {
        let spec: PlatformSpec = serde_json::from_value(serde_json::json!({
            "components": {
                "dashboard": { "managementState": "Managed" },
                "pipelines": { "managementState": "Removed" },
                "legacy": { "managementState": "Sideways" }
            }
        }))
        .unwrap();
        let platform = Platform::new("default", spec);

        assert_eq!(platform.management_state("dashboard"), ManagementState::Managed);
        assert_eq!(platform.management_state("pipelines"), ManagementState::Removed);
        assert_eq!(
            platform.management_state("legacy"),
            ManagementState::Unknown("Sideways".into())
        );
        assert_eq!(platform.management_state("absent"), ManagementState::Removed);

        let value = serde_json::to_value(&platform.spec).unwrap();
        assert_eq!(value["components"]["legacy"]["managementState"], "Sideways");
    }
}
