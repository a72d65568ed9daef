//! 所有者引用维护
//!
//! 用于迁移时移除遗留控制器的引用，以及将对象从某个所有者名下解除。

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use stratus_common::{resources, Error, Gvk, Result};
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::request::InstanceRef;

/// 所有者引用选择器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerSelector {
    /// 按所有者的 group 与 kind 匹配，版本不参与比较
    Kind {
        /// API 组
        group: String,
        /// 类型
        kind: String,
    },
    /// 按所有者 UID 匹配
    Uid(String),
}

impl OwnerSelector {
    /// 按 group/kind 选择
    pub fn kind(group: &str, kind: &str) -> Self {
        Self::Kind {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }

    /// 引用是否被选中
    pub fn matches(&self, reference: &OwnerReference) -> bool {
        match self {
            Self::Kind { group, kind } => {
                let owner = Gvk::from_api_version(&reference.api_version, &reference.kind);
                owner.group == *group && owner.kind == *kind
            }
            Self::Uid(uid) => reference.uid == *uid,
        }
    }
}

/// 移除匹配谓词的所有者引用
///
/// 只有在确实移除了引用时才写回集群，写回后 `obj` 更新为服务端返回的对象。
/// 返回是否发生了写入。
pub async fn remove_owner_references<F>(
    client: &dyn ClusterClient,
    obj: &mut DynamicObject,
    predicate: F,
) -> Result<bool>
where
    F: Fn(&OwnerReference) -> bool,
{
    let references = obj.metadata.owner_references.clone().unwrap_or_default();
    let retained: Vec<OwnerReference> = references
        .iter()
        .filter(|r| !predicate(r))
        .cloned()
        .collect();

    if retained.len() == references.len() {
        return Ok(false);
    }

    let removed = references.len() - retained.len();
    obj.metadata.owner_references = Some(retained);

    let updated = client.replace(obj).await?;

    info!(
        object = %resources::format_object(obj),
        removed,
        "已移除所有者引用"
    );
    *obj = updated;
    Ok(true)
}

/// 将实例设置为对象的控制器引用
///
/// 已存在指向其他实例的控制器引用时返回 `AlreadyOwned`。
pub fn set_controller_reference(owner: &InstanceRef, obj: &mut DynamicObject) -> Result<()> {
    let reference = owner.controller_reference();
    let name = resources::namespaced_name(obj);
    let references = obj.metadata.owner_references.get_or_insert_with(Vec::new);

    if let Some(existing) = references
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != reference.uid)
    {
        return Err(Error::AlreadyOwned {
            name,
            owner: format!("{}/{}", existing.kind, existing.name),
        });
    }

    match references.iter_mut().find(|r| r.uid == reference.uid) {
        Some(current) => *current = reference,
        None => references.push(reference),
    }
    debug!(owner = %owner.name, "已设置控制器引用");
    Ok(())
}
