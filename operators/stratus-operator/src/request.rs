//! 调谐请求上下文
//!
//! 每次调谐构造一个新的 `ReconciliationRequest`，调谐结束后丢弃，从不持久化。

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use kube::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use stratus_common::{Error, Gvk, Result};

use crate::client::ClusterClient;
use crate::crd::Release;

/// 调谐所属的实例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    /// apiVersion
    pub api_version: String,
    /// 类型
    pub kind: String,
    /// 名称
    pub name: String,
    /// 命名空间，集群级资源为空
    pub namespace: Option<String>,
    /// UID
    pub uid: String,
    /// generation
    pub generation: i64,
}

impl InstanceRef {
    /// 从类型与元数据构造
    pub fn new(api_version: &str, kind: &str, meta: &ObjectMeta) -> Result<Self> {
        let name = meta
            .name
            .clone()
            .ok_or_else(|| Error::structural("metadata.name", "instance has no name"))?;
        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name,
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone().unwrap_or_default(),
            generation: meta.generation.unwrap_or_default(),
        })
    }

    /// 从静态类型的资源构造
    pub fn from_resource<K>(obj: &K) -> Result<Self>
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(&K::api_version(&()), &K::kind(&()), obj.meta())
    }

    /// 从无类型对象构造
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self> {
        let gvk = Gvk::of(obj)?;
        Self::new(&gvk.api_version(), &gvk.kind, &obj.metadata)
    }

    /// 指向该实例的控制器引用
    pub fn controller_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// 资源归属判断
pub trait Manager: Send + Sync {
    /// 该 GVK 是否由当前控制器拥有（需要设置控制器引用）
    fn owns(&self, gvk: &Gvk) -> bool;
}

/// 按 (group, kind) 列表判断归属
#[derive(Debug, Clone, Default)]
pub struct OwnedKinds {
    kinds: HashSet<(String, String)>,
}

impl OwnedKinds {
    /// 从 (group, kind) 列表创建
    pub fn new<'a>(kinds: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            kinds: kinds
                .into_iter()
                .map(|(g, k)| (g.to_string(), k.to_string()))
                .collect(),
        }
    }
}

impl Manager for OwnedKinds {
    fn owns(&self, gvk: &Gvk) -> bool {
        self.kinds.contains(&(gvk.group.clone(), gvk.kind.clone()))
    }
}

/// 单次调谐的上下文
#[derive(Clone)]
pub struct ReconciliationRequest {
    /// 集群客户端
    pub client: Arc<dyn ClusterClient>,
    /// 所属实例
    pub instance: InstanceRef,
    /// 待收敛的渲染资源，按顺序处理
    pub resources: Vec<DynamicObject>,
    /// 发布版本信息
    pub release: Release,
    /// 归属判断
    pub manager: Arc<dyn Manager>,
}
