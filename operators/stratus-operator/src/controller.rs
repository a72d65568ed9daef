//! 控制器模块
//!
//! 该模块把 Platform 协调器与各组件控制器接入 kube-rs 的控制器运行时，
//! 管理它们的启动与停止。

use anyhow::{Context, Result};
use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::controller::{Action, Controller as KubeController},
    runtime::watcher,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::components::ComponentContext;
use crate::crd::Platform;
use crate::reconcile::Reconciler;
use crate::registry::Registry;

/// Platform 控制器的共享上下文
struct PlatformContext {
    reconciler: Arc<Reconciler>,
    running: Arc<RwLock<bool>>,
}

/// 控制器结构体
pub struct Controller {
    /// Kubernetes 客户端
    client: Client,
    /// Platform 协调器
    reconciler: Arc<Reconciler>,
    /// 组件注册表
    registry: Arc<Registry>,
    /// 组件控制器上下文
    context: Arc<ComponentContext>,
    /// 控制器是否正在运行
    running: Arc<RwLock<bool>>,
}

impl Controller {
    /// 创建新的控制器
    pub fn new(
        client: Client,
        reconciler: Arc<Reconciler>,
        registry: Arc<Registry>,
        context: Arc<ComponentContext>,
    ) -> Self {
        Self {
            client,
            reconciler,
            registry,
            context,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 启动控制器
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        for handler in self.registry.handlers() {
            handler
                .new_component_reconciler(self.context.clone())
                .await
                .with_context(|| format!("启动组件 {} 控制器失败", handler.name()))?;
        }

        self.start_platform_controller();

        info!(
            components = self.registry.len(),
            "Stratus Operator 控制器已启动"
        );
        Ok(())
    }

    /// 停止控制器，之后到达的 Platform 事件不再协调
    pub async fn stop(&mut self) -> Result<()> {
        {
            let mut running = self.running.write().await;
            *running = false;
        }

        info!("Stratus Operator 控制器已停止");
        Ok(())
    }

    /// 控制器是否正在运行
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    fn start_platform_controller(&self) {
        let platforms: Api<Platform> = Api::all(self.client.clone());
        let context = Arc::new(PlatformContext {
            reconciler: self.reconciler.clone(),
            running: self.running.clone(),
        });

        tokio::spawn(async move {
            info!("启动 Platform 控制器");
            KubeController::new(platforms, watcher::Config::default())
                .shutdown_on_signal()
                .run(
                    |platform, ctx: Arc<PlatformContext>| async move {
                        if !*ctx.running.read().await {
                            return Ok(Action::await_change());
                        }
                        ctx.reconciler.reconcile(platform).await
                    },
                    |platform, error, ctx| ctx.reconciler.handle_error(platform, error),
                    context,
                )
                .for_each(|result| async move {
                    match result {
                        Ok(o) => debug!("协调成功: {:?}", o),
                        Err(e) => error!("协调错误: {}", e),
                    }
                })
                .await;
            info!("Platform 控制器已停止");
        });
    }
}
