//! 已部署资源缓存模块
//!
//! 记录“该期望内容已在该 resourceVersion 上成功写入”，用于跳过重复的 API 写操作。
//! 条目自插入起按固定 TTL 过期，缓存只在进程内存中，重启后为空。

use kube::api::DynamicObject;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stratus_common::{resources, Gvk, Result};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// 默认缓存有效期：10 分钟
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// 部署资源缓存
#[derive(Debug, Clone)]
pub struct ResourceCache {
    /// 键到过期时间的映射
    entries: Arc<RwLock<HashMap<String, Instant>>>,
    /// 缓存有效期
    ttl: Duration,
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResourceCache {
    /// 创建新的缓存
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// 键是否存在且未过期
    pub async fn has(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map_or(false, |expires_at| Instant::now() < *expires_at)
    }

    /// 记录键，过期时间从当前时刻开始计算
    pub async fn add(&self, key: String) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.write().await.insert(key, expires_at);
    }

    /// 删除键
    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// 移除过期条目
    pub async fn sync(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| now < *expires_at);

        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "缓存清理完成");
        }
    }

    /// 当前条目数（包括尚未清理的过期条目）
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// 计算缓存键
///
/// `original` 提供 GVK、名称与 resourceVersion，`modified` 提供内容摘要：
/// `{groupVersion}.{kind}.{namespace/name}.{resourceVersion}.{hash}`。
pub fn cache_key(original: &DynamicObject, modified: &DynamicObject) -> Result<String> {
    let gvk = Gvk::of(original)?;
    let hash = resources::encoded_hash(modified)?;
    Ok(format!(
        "{}.{}.{}.{}.{}",
        gvk.api_version(),
        gvk.kind,
        resources::namespaced_name(original),
        original.metadata.resource_version.as_deref().unwrap_or_default(),
        hash
    ))
}
