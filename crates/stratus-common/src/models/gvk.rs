//! GroupVersionKind 模型
//!
//! 无类型资源在部署管线中只通过 apiVersion/kind 识别，该模块负责解析和比较。

use kube::api::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// 核心组（apiVersion 为 "v1"）
pub const CORE_GROUP: &str = "";

/// Deployment
pub const DEPLOYMENT: (&str, &str) = ("apps", "Deployment");
/// ClusterRole
pub const CLUSTER_ROLE: (&str, &str) = ("rbac.authorization.k8s.io", "ClusterRole");
/// CustomResourceDefinition
pub const CUSTOM_RESOURCE_DEFINITION: (&str, &str) =
    ("apiextensions.k8s.io", "CustomResourceDefinition");
/// OpenTelemetry Collector
pub const OPENTELEMETRY_COLLECTOR: (&str, &str) = ("opentelemetry.io", "OpenTelemetryCollector");
/// Tempo 集群部署
pub const TEMPO_STACK: (&str, &str) = ("tempo.grafana.com", "TempoStack");
/// Tempo 单体部署
pub const TEMPO_MONOLITHIC: (&str, &str) = ("tempo.grafana.com", "TempoMonolithic");
/// 监控栈
pub const MONITORING_STACK: (&str, &str) = ("monitoring.rhobs", "MonitoringStack");

/// 资源的 GroupVersionKind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    /// API 组，核心组为空字符串
    pub group: String,
    /// 版本
    pub version: String,
    /// 类型
    pub kind: String,
}

impl Gvk {
    /// 创建新的 GVK
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// 从 apiVersion 与 kind 解析，如 `apps/v1` + `Deployment`
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((group, version)) => Self::new(group, version, kind),
            None => Self::new(CORE_GROUP, api_version, kind),
        }
    }

    /// 读取无类型对象的 GVK
    pub fn of(obj: &DynamicObject) -> Result<Self> {
        let types = obj.types.as_ref().ok_or_else(|| {
            Error::structural(
                "apiVersion",
                format!(
                    "object {} has no apiVersion/kind",
                    obj.metadata.name.as_deref().unwrap_or_default()
                ),
            )
        })?;
        if types.kind.is_empty() || types.api_version.is_empty() {
            return Err(Error::structural("kind", "apiVersion and kind must be set"));
        }
        Ok(Self::from_api_version(&types.api_version, &types.kind))
    }

    /// 组成 apiVersion 字符串
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// 是否属于给定的 (group, kind)，版本不参与比较
    pub fn is(&self, group_kind: (&str, &str)) -> bool {
        self.group == group_kind.0 && self.kind == group_kind.1
    }

    /// 转换为 kube-rs 的 GroupVersionKind
    pub fn to_kube(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}
