//! 状态条件模型
//!
//! 平台资源与组件资源共用同一套 Condition 结构，序列化格式与 Kubernetes
//! `metav1.Condition` 兼容。

use chrono::{DateTime, Utc};
use kube::api::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 可用性条件
pub const CONDITION_AVAILABLE: &str = "Available";
/// 就绪条件
pub const CONDITION_READY: &str = "Ready";
/// 首次调谐前写入的进行中条件
pub const CONDITION_PROGRESSING: &str = "Progressing";

/// 条件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum ConditionStatus {
    /// 满足
    True,
    /// 不满足
    False,
    /// 未知
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// 状态条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// 条件类型
    #[serde(rename = "type")]
    pub type_: String,
    /// 条件状态
    pub status: ConditionStatus,
    /// 机器可读原因
    #[serde(default)]
    pub reason: String,
    /// 人类可读消息
    #[serde(default)]
    pub message: String,
    /// 最近一次状态变化的时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// 创建新的条件，转换时间在写入列表时确定
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    /// 状态是否为 True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// 在条件列表中写入或更新条件
///
/// 状态未变化时保留原有的 `lastTransitionTime`，只更新原因和消息。
pub fn set_status_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status != condition.status || existing.last_transition_time.is_none() {
                existing.status = condition.status;
                existing.last_transition_time = Some(Utc::now());
            }
            existing.reason = condition.reason;
            existing.message = condition.message;
        }
        None => {
            condition.last_transition_time.get_or_insert_with(Utc::now);
            conditions.push(condition);
        }
    }
}

/// 查找给定类型的条件
pub fn find_status_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// 条件是否存在且为 True
pub fn is_status_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_status_condition(conditions, type_).map_or(false, Condition::is_true)
}

/// 从无类型对象的 `status.conditions` 读取条件
///
/// 格式不正确的条目会被忽略。
pub fn conditions_of(obj: &DynamicObject) -> Vec<Condition> {
    obj.data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
