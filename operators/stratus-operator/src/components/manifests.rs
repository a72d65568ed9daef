//! 清单来源
//!
//! 组件控制器通过 `ManifestSource` 获得需要收敛的资源对象，目录实现按文件名顺序
//! 读取 YAML 清单并替换 `${PARAM}` 占位符。

use kube::api::DynamicObject;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use stratus_common::{Error, Result};
use tracing::debug;

/// 集群级资源类型，渲染时不设置默认命名空间
const CLUSTER_SCOPED_KINDS: [&str; 11] = [
    "Namespace",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
    "PriorityClass",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "APIService",
    "ConsoleLink",
];

/// 渲染后的资源来源
#[cfg_attr(test, mockall::automock)]
pub trait ManifestSource: Send + Sync {
    /// 使用给定参数渲染资源，返回顺序即部署顺序
    fn render(&self, params: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>>;
}

/// 基于目录的清单来源
#[derive(Debug, Clone)]
pub struct DirManifestSource {
    /// 清单目录
    dir: PathBuf,
    /// 默认命名空间
    namespace: String,
    /// 基础参数
    params: BTreeMap<String, String>,
}

impl DirManifestSource {
    /// 创建目录清单来源，`NAMESPACE` 参数默认为组件命名空间
    pub fn new(dir: impl Into<PathBuf>, namespace: &str, params: BTreeMap<String, String>) -> Self {
        let mut params = params;
        params
            .entry("NAMESPACE".to_string())
            .or_insert_with(|| namespace.to_string());
        Self {
            dir: dir.into(),
            namespace: namespace.to_string(),
            params,
        }
    }

    fn manifest_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if path.is_file() && is_yaml {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn render_document(&self, doc: serde_yaml::Value) -> Result<Option<DynamicObject>> {
        let has_kind = doc
            .get("kind")
            .and_then(|k| k.as_str())
            .map_or(false, |k| !k.is_empty());
        if !has_kind {
            return Ok(None);
        }

        let mut obj: DynamicObject = serde_yaml::from_value(doc)?;
        let kind = obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        let namespaced = !CLUSTER_SCOPED_KINDS.contains(&kind);
        if namespaced && obj.metadata.namespace.as_deref().map_or(true, str::is_empty) {
            obj.metadata.namespace = Some(self.namespace.clone());
        }
        Ok(Some(obj))
    }
}

/// 替换 `${KEY}` 形式的占位符，未知占位符保持原样
pub fn substitute(content: &str, params: &BTreeMap<String, String>) -> String {
    params.iter().fold(content.to_string(), |acc, (key, value)| {
        acc.replace(&format!("${{{}}}", key), value)
    })
}

impl ManifestSource for DirManifestSource {
    fn render(&self, overrides: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>> {
        let mut params = self.params.clone();
        params.extend(
            overrides
                .iter()
                .map(|(k, v)| (k.to_uppercase(), v.clone())),
        );

        let mut objects = Vec::new();
        for file in self.manifest_files()? {
            let content = fs::read_to_string(&file)?;
            let content = substitute(&content, &params);

            for document in serde_yaml::Deserializer::from_str(&content) {
                let value = serde_yaml::Value::deserialize(document).map_err(|e| {
                    Error::Serialization(format!("{}: {}", file.display(), e))
                })?;
                if value.is_null() {
                    continue;
                }
                if let Some(obj) = self.render_document(value)? {
                    objects.push(obj);
                }
            }
        }

        debug!(dir = %self.dir.display(), count = objects.len(), "已渲染清单");
        Ok(objects)
    }
}
