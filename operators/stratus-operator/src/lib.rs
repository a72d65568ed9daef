//! Stratus Operator - 管理 Stratus 平台组件的 Kubernetes Operator
//!
//! 该模块实现了 Stratus 平台的 Kubernetes Operator：`Platform` 资源声明每个组件的管理状态，
//! 协调器为每个组件维护一个组件 CR，组件控制器再把渲染后的清单收敛到集群。

pub mod cache;
pub mod client;
pub mod components;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deploy;
pub mod merge;
pub mod metrics;
pub mod ownership;
pub mod reconcile;
pub mod registry;
pub mod request;

use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::cache::ResourceCache;
use crate::client::{ClusterClient, KubeClusterClient};
use crate::components::{ComponentContext, StandardComponent};
use crate::config::{ComponentConfig, OperatorConfig};
use crate::reconcile::Reconciler;
use crate::registry::Registry;

/// 按配置顺序注册组件处理器
pub fn build_registry(components: &[ComponentConfig]) -> Registry {
    let mut registry = Registry::new();
    for component in components {
        registry.add(Arc::new(StandardComponent::new(component.clone())));
    }
    registry
}

/// Operator 主结构体
pub struct StratusOperator {
    /// Kubernetes 客户端
    client: Client,
    /// 控制器
    controller: Arc<RwLock<controller::Controller>>,
}

impl StratusOperator {
    /// 创建新的 Operator 实例
    pub async fn new(config: &OperatorConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("创建 Kubernetes 客户端失败")?;
        let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));

        let registry = build_registry(&config.components);
        registry.init(&config.release).context("初始化组件失败")?;
        let registry = Arc::new(registry);

        let cache = config
            .cache
            .enabled
            .then(|| ResourceCache::new(config.cache_ttl()));
        let context = Arc::new(ComponentContext {
            client: client.clone(),
            cluster: cluster.clone(),
            cache,
            mode: config.deploy_mode,
            release: config.release.clone(),
            legacy_owners: config.legacy_owner_selectors(),
        });

        let reconciler = Arc::new(Reconciler::new(
            cluster,
            registry.clone(),
            config.release.clone(),
        ));
        let controller = Arc::new(RwLock::new(controller::Controller::new(
            client.clone(),
            reconciler,
            registry,
            context,
        )));

        info!(
            mode = ?config.deploy_mode,
            components = config.components.len(),
            "Operator 已创建"
        );
        Ok(Self { client, controller })
    }

    /// Kubernetes 客户端
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// 启动 Operator
    pub async fn start(&self) -> Result<()> {
        self.controller.write().await.start().await
    }

    /// 停止 Operator
    pub async fn stop(&self) -> Result<()> {
        self.controller.write().await.stop().await
    }
}
