//! 集群客户端模块
//!
//! 部署管线只依赖 `ClusterClient` 抽象，生产环境使用基于 kube-rs 的实现，
//! 测试中使用内存实现。

mod kube_client;

#[cfg(test)]
pub mod fake;

pub use kube_client::KubeClusterClient;

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;
use stratus_common::{Gvk, Result};

/// 写操作参数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteParams {
    /// 字段所有者（server-side apply 的 manager）
    pub field_owner: String,
    /// 是否强制获取字段所有权
    pub force: bool,
}

impl WriteParams {
    /// 以给定字段所有者强制写入
    pub fn forced(field_owner: impl Into<String>) -> Self {
        Self {
            field_owner: field_owner.into(),
            force: true,
        }
    }
}

/// 集群 API 能力
///
/// NotFound / AlreadyExists 必须以可区分的错误变体返回。
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// 读取对象
    async fn get(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<DynamicObject>;

    /// 列出对象
    async fn list(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>>;

    /// 创建对象
    async fn create(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject>;

    /// 以 apply 类型补丁修改已存在的对象
    async fn patch(
        &self,
        current: &DynamicObject,
        body: &DynamicObject,
        params: &WriteParams,
    ) -> Result<DynamicObject>;

    /// server-side apply，对象不存在时创建
    async fn apply(&self, obj: &DynamicObject, params: &WriteParams) -> Result<DynamicObject>;

    /// 整体替换对象
    async fn replace(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// 前台级联删除对象
    async fn delete(&self, gvk: &Gvk, namespace: Option<&str>, name: &str) -> Result<()>;

    /// 对 status 子资源执行 merge patch，`status` 为新的 status 内容
    async fn patch_status(
        &self,
        gvk: &Gvk,
        namespace: Option<&str>,
        name: &str,
        status: &Value,
    ) -> Result<DynamicObject>;
}
