//! 资源工具模块
//!
//! 提供无类型资源对象的内容哈希、注解/标签访问器、嵌套字段访问以及诊断格式化。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::Gvk;

/// 计算哈希时移除的元数据字段
const VOLATILE_METADATA_FIELDS: [&str; 6] = [
    "uid",
    "resourceVersion",
    "deletionTimestamp",
    "creationTimestamp",
    "managedFields",
    "ownerReferences",
];

/// 计算资源的内容摘要 (SHA-256)
///
/// 会被服务端改写的字段（resourceVersion、uid、managedFields、ownerReferences、
/// deletionTimestamp、creationTimestamp、status）不参与计算，对象键按字典序编码。
pub fn hash(obj: &DynamicObject) -> Result<Vec<u8>> {
    let mut value = serde_json::to_value(obj)?;
    if let Some(root) = value.as_object_mut() {
        root.remove("status");
        if let Some(metadata) = root.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in VOLATILE_METADATA_FIELDS {
                metadata.remove(field);
            }
        }
    }

    let mut hasher = Sha256::new();
    write_canonical(&value, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

/// 计算内容摘要并编码为 URL 安全的 base64 字符串
pub fn encoded_hash(obj: &DynamicObject) -> Result<String> {
    Ok(URL_SAFE_NO_PAD.encode(hash(obj)?))
}

fn write_canonical(value: &Value, hasher: &mut Sha256) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            hasher.update(b"{");
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                hasher.update(serde_json::to_string(key)?.as_bytes());
                hasher.update(b":");
                write_canonical(&map[key], hasher)?;
            }
            hasher.update(b"}");
        }
        Value::Array(items) => {
            hasher.update(b"[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    hasher.update(b",");
                }
                write_canonical(item, hasher)?;
            }
            hasher.update(b"]");
        }
        scalar => hasher.update(serde_json::to_string(scalar)?.as_bytes()),
    }
    Ok(())
}

/// 读取注解
pub fn get_annotation<K: Resource>(obj: &K, key: &str) -> Option<String> {
    obj.annotations().get(key).cloned()
}

/// 写入注解，注解表不存在时自动创建
pub fn set_annotation<K: Resource>(obj: &mut K, key: &str, value: &str) {
    obj.annotations_mut().insert(key.to_string(), value.to_string());
}

/// 批量写入注解
pub fn set_annotations<'a, K, I>(obj: &mut K, values: I)
where
    K: Resource,
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let annotations = obj.annotations_mut();
    for (k, v) in values {
        annotations.insert(k.clone(), v.clone());
    }
}

/// 删除注解
pub fn remove_annotation<K: Resource>(obj: &mut K, key: &str) {
    if let Some(annotations) = obj.meta_mut().annotations.as_mut() {
        annotations.remove(key);
    }
}

/// 注解存在且取值属于给定集合；集合为空时只判断存在
pub fn has_annotation<K: Resource>(obj: &K, key: &str, values: &[&str]) -> bool {
    match obj.annotations().get(key) {
        Some(v) => values.is_empty() || values.contains(&v.as_str()),
        None => false,
    }
}

/// 读取标签
pub fn get_label<K: Resource>(obj: &K, key: &str) -> Option<String> {
    obj.labels().get(key).cloned()
}

/// 写入标签，标签表不存在时自动创建
pub fn set_label<K: Resource>(obj: &mut K, key: &str, value: &str) {
    obj.labels_mut().insert(key.to_string(), value.to_string());
}

/// 批量写入标签
pub fn set_labels<'a, K, I>(obj: &mut K, values: I)
where
    K: Resource,
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let labels = obj.labels_mut();
    for (k, v) in values {
        labels.insert(k.clone(), v.clone());
    }
}

/// 删除标签
pub fn remove_label<K: Resource>(obj: &mut K, key: &str) {
    if let Some(labels) = obj.meta_mut().labels.as_mut() {
        labels.remove(key);
    }
}

/// 标签存在且取值属于给定集合；集合为空时只判断存在
pub fn has_label<K: Resource>(obj: &K, key: &str, values: &[&str]) -> bool {
    match obj.labels().get(key) {
        Some(v) => values.is_empty() || values.contains(&v.as_str()),
        None => false,
    }
}

/// 按路径读取嵌套字段
pub fn nested_field<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |current, key| current.get(*key))
}

/// 按路径写入嵌套字段，缺失的中间对象会被创建
///
/// 中间节点不是对象时返回 `Structural` 错误。
pub fn set_nested_field(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let (last, parents) = path
        .split_last()
        .ok_or_else(|| Error::structural("", "empty field path"))?;

    let mut current = data;
    for (i, key) in parents.iter().enumerate() {
        let map = current
            .as_object_mut()
            .ok_or_else(|| Error::structural(path[..i].join("."), "expected an object"))?;
        current = map
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }

    let map = current
        .as_object_mut()
        .ok_or_else(|| Error::structural(parents.join("."), "expected an object"))?;
    map.insert(last.to_string(), value);
    Ok(())
}

/// 按路径删除嵌套字段，返回被删除的值
pub fn remove_nested_field(data: &mut Value, path: &[&str]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut current = data;
    for key in parents {
        current = current.get_mut(*key)?;
    }
    current.as_object_mut()?.remove(*last)
}

/// `namespace/name` 形式的对象名称，集群级对象只有名称
pub fn namespaced_name<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{}/{}", ns, obj.name_any()),
        _ => obj.name_any(),
    }
}

/// 用于日志与错误的对象描述：`gvk namespace/name`
pub fn format_object(obj: &DynamicObject) -> String {
    match Gvk::of(obj) {
        Ok(gvk) => format!("{} {}", gvk, namespaced_name(obj)),
        Err(_) => namespaced_name(obj),
    }
}
