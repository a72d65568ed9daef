//! 合并策略
//!
//! 按资源类型决定期望对象中的哪些字段被覆盖、哪些从集群当前对象保留。
//! 每个策略都是作用于两个文档的纯函数。

use kube::api::DynamicObject;
use serde_json::{Map, Value};
use stratus_common::gvk::{
    CLUSTER_ROLE, DEPLOYMENT, MONITORING_STACK, OPENTELEMETRY_COLLECTOR, TEMPO_MONOLITHIC,
    TEMPO_STACK,
};
use stratus_common::metadata::{ANNOTATION_MANAGED, MANAGED_TRUE};
use stratus_common::{resources, Error, Gvk, Result};

use crate::deploy::DeployMode;

const REPLICAS: [&str; 2] = ["spec", "replicas"];
const CONTAINERS: [&str; 4] = ["spec", "template", "spec", "containers"];
const SPEC_RESOURCES: [&str; 2] = ["spec", "resources"];

/// 可观测性类资源
const OBSERVABILITY_KINDS: [(&str, &str); 4] = [
    OPENTELEMETRY_COLLECTOR,
    TEMPO_STACK,
    TEMPO_MONOLITHIC,
    MONITORING_STACK,
];

/// 当前对象是否被强制标记为托管
pub fn is_force_managed(current: &DynamicObject) -> bool {
    resources::has_annotation(current, ANNOTATION_MANAGED, &[MANAGED_TRUE])
}

/// 按资源类型执行合并策略
pub fn apply_merge_policy(
    mode: DeployMode,
    current: Option<&DynamicObject>,
    desired: &mut DynamicObject,
) -> Result<()> {
    let gvk = Gvk::of(desired)?;
    let carry_forward = current.filter(|c| !is_force_managed(c));

    if gvk.is(DEPLOYMENT) {
        if let Some(current) = carry_forward {
            match mode {
                DeployMode::Patch => remove_deployment_resources(desired)?,
                DeployMode::Apply => merge_deployments(current, desired)?,
            }
        }
    } else if gvk.is(CLUSTER_ROLE) {
        strip_aggregated_rules(desired);
    } else if OBSERVABILITY_KINDS.iter().any(|gk| gvk.is(*gk)) {
        if let Some(current) = carry_forward {
            merge_observability_resources(current, desired);
        }
    }
    Ok(())
}

fn containers_mut<'a>(data: &'a mut Value) -> Result<Option<&'a mut Vec<Value>>> {
    let mut node = data;
    for key in CONTAINERS {
        node = match node.get_mut(key) {
            Some(next) => next,
            None => return Ok(None),
        };
    }
    node.as_array_mut()
        .map(Some)
        .ok_or_else(|| Error::structural(CONTAINERS.join("."), "expected a list"))
}

fn container_name(container: &Value) -> Option<&str> {
    container.get("name").and_then(Value::as_str)
}

/// 从期望的 Deployment 中移除副本数与所有容器的资源配置
pub fn remove_deployment_resources(target: &mut DynamicObject) -> Result<()> {
    resources::remove_nested_field(&mut target.data, &REPLICAS);
    if let Some(containers) = containers_mut(&mut target.data)? {
        for container in containers.iter_mut() {
            let container = container.as_object_mut().ok_or_else(|| {
                Error::structural(CONTAINERS.join("."), "container is not an object")
            })?;
            container.remove("resources");
        }
    }
    Ok(())
}

/// 把当前 Deployment 的副本数与容器资源复制到期望对象
///
/// 当前对象没有副本数或容器没有资源配置时，从期望对象中移除对应字段。
/// 容器按名称匹配，未匹配的期望容器保持原样。
pub fn merge_deployments(source: &DynamicObject, target: &mut DynamicObject) -> Result<()> {
    match resources::nested_field(&source.data, &REPLICAS) {
        Some(replicas) => {
            resources::set_nested_field(&mut target.data, &REPLICAS, replicas.clone())?
        }
        None => {
            resources::remove_nested_field(&mut target.data, &REPLICAS);
        }
    }

    let mut source_resources: Map<String, Value> = Map::new();
    if let Some(containers) = resources::nested_field(&source.data, &CONTAINERS) {
        let containers = containers
            .as_array()
            .ok_or_else(|| Error::structural(CONTAINERS.join("."), "expected a list"))?;
        for container in containers {
            if let Some(name) = container_name(container) {
                let value = container.get("resources").cloned().unwrap_or(Value::Null);
                source_resources.insert(name.to_string(), value);
            }
        }
    }

    if let Some(containers) = containers_mut(&mut target.data)? {
        for container in containers.iter_mut() {
            let Some(name) = container_name(container).map(str::to_string) else {
                continue;
            };
            let Some(value) = source_resources.get(&name) else {
                continue;
            };
            let container = container.as_object_mut().ok_or_else(|| {
                Error::structural(CONTAINERS.join("."), "container is not an object")
            })?;
            if is_empty(value) {
                container.remove("resources");
            } else {
                container.insert("resources".into(), value.clone());
            }
        }
    }
    Ok(())
}

/// 当前对象具有非空 `spec.resources` 时原样复制到期望对象
pub fn merge_observability_resources(source: &DynamicObject, target: &mut DynamicObject) {
    if let Some(value) = resources::nested_field(&source.data, &SPEC_RESOURCES) {
        if !is_empty(value) {
            let value = value.clone();
            if let Some(spec) = target.data.get_mut("spec").and_then(Value::as_object_mut) {
                spec.insert("resources".into(), value);
            } else if let Some(root) = target.data.as_object_mut() {
                let mut spec = Map::new();
                spec.insert("resources".into(), value);
                root.insert("spec".into(), Value::Object(spec));
            }
        }
    }
}

/// 声明了 `aggregationRule` 的 ClusterRole 的 rules 由控制器维护，移除期望中的 rules
pub fn strip_aggregated_rules(target: &mut DynamicObject) {
    if target.data.get("aggregationRule").is_some() {
        resources::remove_nested_field(&mut target.data, &["rules"]);
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
