//! 组件模块
//!
//! `StandardComponent` 是由 `ComponentConfig` 驱动的通用组件处理器：它负责构造组件 CR、
//! 把组件状态汇总到 Platform，并启动自己的控制器把清单收敛到集群。

pub mod manifests;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, ApiResource, DynamicObject},
    runtime::{controller::Action, watcher, Controller},
    Client, ResourceExt,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stratus_common::error::ignore_not_found;
use stratus_common::gvk::DEPLOYMENT;
use stratus_common::metadata::ANNOTATION_MANAGEMENT_STATE;
use stratus_common::{
    conditions_of, find_status_condition, resources, set_status_condition, Condition,
    ConditionStatus, Error, Gvk, Result, CONDITION_READY,
};
use tracing::{debug, error, info, warn};

use crate::cache::ResourceCache;
use crate::client::ClusterClient;
use crate::config::ComponentConfig;
use crate::crd::{ComponentStatus, ManagementState, Platform, PlatformStatus, Release};
use crate::deploy::{DeployAction, DeployMode};
use crate::ownership::OwnerSelector;
use crate::registry::ComponentHandler;
use crate::request::{InstanceRef, Manager, OwnedKinds, ReconciliationRequest};
use manifests::{DirManifestSource, ManifestSource};

/// 组件 CR 的 API 组
pub const COMPONENTS_GROUP: &str = "components.platform.stratus.io";
/// 组件 CR 的版本
pub const COMPONENTS_VERSION: &str = "v1alpha1";

/// 组件控制器为其设置控制器引用的资源类型
const OWNED_KINDS: [(&str, &str); 12] = [
    ("apps", "Deployment"),
    ("apps", "StatefulSet"),
    ("", "Service"),
    ("", "ConfigMap"),
    ("", "Secret"),
    ("", "ServiceAccount"),
    ("rbac.authorization.k8s.io", "Role"),
    ("rbac.authorization.k8s.io", "RoleBinding"),
    ("rbac.authorization.k8s.io", "ClusterRole"),
    ("rbac.authorization.k8s.io", "ClusterRoleBinding"),
    ("networking.k8s.io", "NetworkPolicy"),
    ("monitoring.coreos.com", "ServiceMonitor"),
];

/// 组件 Ready 条件的原因
pub const REASON_READY: &str = "Ready";
/// Deployment 尚未就绪
pub const REASON_DEPLOYMENTS_NOT_READY: &str = "DeploymentsNotReady";
/// 部署失败
pub const REASON_ERROR: &str = "Error";
/// 组件已被移除
pub const REASON_REMOVED: &str = "Removed";

const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);
const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// 组件控制器共享的运行时依赖
pub struct ComponentContext {
    /// Kubernetes 客户端，用于启动 watcher
    pub client: Client,
    /// 集群客户端
    pub cluster: Arc<dyn ClusterClient>,
    /// 所有组件共享的部署缓存
    pub cache: Option<ResourceCache>,
    /// 部署模式
    pub mode: DeployMode,
    /// 发布版本信息
    pub release: Release,
    /// 需要迁移掉的遗留所有者
    pub legacy_owners: Vec<OwnerSelector>,
}

/// 通用组件处理器
pub struct StandardComponent {
    config: ComponentConfig,
    source: Arc<dyn ManifestSource>,
}

impl StandardComponent {
    /// 使用目录清单来源创建组件
    pub fn new(config: ComponentConfig) -> Self {
        let source = Arc::new(DirManifestSource::new(
            config.manifests.clone(),
            &config.namespace,
            config.params.clone(),
        ));
        Self { config, source }
    }

    /// 组件 CR 的 GVK
    pub fn cr_gvk(&self) -> Gvk {
        Gvk::new(COMPONENTS_GROUP, COMPONENTS_VERSION, &self.config.kind)
    }

    /// 组件 CR 的实例名称
    pub fn instance_name(&self) -> String {
        format!("default-{}", self.config.name)
    }

    fn ready_condition_type(&self) -> String {
        format!("{}Ready", self.config.kind)
    }
}

#[async_trait]
impl ComponentHandler for StandardComponent {
    fn init(&self, release: &Release) -> Result<()> {
        if !self.config.manifests.is_dir() {
            return Err(Error::Config(format!(
                "manifests for component {} not found at {}",
                self.config.name,
                self.config.manifests.display()
            )));
        }
        info!(
            component = %self.config.name,
            release = %release.version,
            "组件初始化完成"
        );
        Ok(())
    }

    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn management_state(&self, platform: &Platform) -> ManagementState {
        platform.management_state(&self.config.name)
    }

    fn new_cr_object(&self, platform: &Platform) -> Result<DynamicObject> {
        let state = self.management_state(platform);
        let gvk = self.cr_gvk();
        let obj = serde_json::from_value(json!({
            "apiVersion": gvk.api_version(),
            "kind": gvk.kind,
            "metadata": {
                "name": self.instance_name(),
                "annotations": { ANNOTATION_MANAGEMENT_STATE: state.to_string() }
            },
            "spec": { "params": platform.component_params(&self.config.name) }
        }))?;
        Ok(obj)
    }

    async fn new_component_reconciler(&self, ctx: Arc<ComponentContext>) -> anyhow::Result<()> {
        let reconciler = Arc::new(ComponentReconciler::from_context(
            self.config.clone(),
            self.source.clone(),
            &ctx,
        ));

        let ar = ApiResource::from_gvk(&self.cr_gvk().to_kube());
        let components: Api<DynamicObject> = Api::all_with(ctx.client.clone(), &ar);
        let deployments: Api<Deployment> = Api::all(ctx.client.clone());
        let name = self.config.name.clone();

        tokio::spawn(async move {
            info!("启动组件 {} 控制器", name);
            Controller::new_with(components, watcher::Config::default(), ar)
                .owns(deployments, watcher::Config::default())
                .shutdown_on_signal()
                .run(
                    |cr, ctx| async move { ctx.reconcile(&cr).await },
                    |cr, err, ctx| ctx.handle_error(&cr, err),
                    reconciler,
                )
                .for_each(|result| async move {
                    match result {
                        Ok(o) => debug!("组件协调成功: {:?}", o),
                        Err(e) => warn!("组件协调错误: {}", e),
                    }
                })
                .await;
            info!("组件 {} 控制器已停止", name);
        });

        Ok(())
    }

    fn update_platform_status(&self, platform: &mut Platform, cr: &DynamicObject) -> Result<()> {
        let state = self.management_state(platform);
        let name = self.config.name.clone();
        let condition_type = self.ready_condition_type();

        let status = platform.status.get_or_insert_with(PlatformStatus::default);
        status
            .installed_components
            .insert(name.clone(), state == ManagementState::Managed);
        status.components.insert(
            name,
            ComponentStatus {
                management_state: state.clone(),
            },
        );

        let condition = match &state {
            ManagementState::Managed => {
                match find_status_condition(&conditions_of(cr), CONDITION_READY) {
                    Some(rc) => Condition::new(
                        &condition_type,
                        rc.status,
                        rc.reason.clone(),
                        rc.message.clone(),
                    ),
                    None => Condition::new(
                        &condition_type,
                        ConditionStatus::Unknown,
                        "Reconciling",
                        "Component status not yet reported",
                    ),
                }
            }
            ManagementState::Removed => Condition::new(
                &condition_type,
                ConditionStatus::False,
                REASON_REMOVED,
                "Component ManagementState is set to Removed",
            ),
            other => Condition::new(
                &condition_type,
                ConditionStatus::Unknown,
                other.to_string(),
                format!("Component ManagementState is set to {}", other),
            ),
        };
        set_status_condition(&mut status.conditions, condition);
        Ok(())
    }
}

/// Deployment 的可用副本数是否达到期望副本数
fn deployment_available(deployment: &DynamicObject) -> bool {
    let desired = resources::nested_field(&deployment.data, &["spec", "replicas"])
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let available = resources::nested_field(&deployment.data, &["status", "availableReplicas"])
        .and_then(Value::as_i64)
        .unwrap_or(0);
    available >= desired
}

/// 组件控制器的调谐逻辑
pub struct ComponentReconciler {
    config: ComponentConfig,
    source: Arc<dyn ManifestSource>,
    cluster: Arc<dyn ClusterClient>,
    action: DeployAction,
    release: Release,
    manager: Arc<dyn Manager>,
}

impl ComponentReconciler {
    /// 创建组件协调器
    pub fn new(
        config: ComponentConfig,
        source: Arc<dyn ManifestSource>,
        cluster: Arc<dyn ClusterClient>,
        action: DeployAction,
        release: Release,
    ) -> Self {
        Self {
            config,
            source,
            cluster,
            action,
            release,
            manager: Arc::new(OwnedKinds::new(OWNED_KINDS)),
        }
    }

    fn from_context(
        config: ComponentConfig,
        source: Arc<dyn ManifestSource>,
        ctx: &ComponentContext,
    ) -> Self {
        let mut action = DeployAction::new()
            .with_mode(ctx.mode)
            .with_legacy_owners(ctx.legacy_owners.clone());
        if let Some(cache) = &ctx.cache {
            action = action.with_cache(cache.clone());
        }
        Self::new(config, source, ctx.cluster.clone(), action, ctx.release.clone())
    }

    /// 协调组件 CR：渲染清单、部署资源并更新 Ready 条件
    pub async fn reconcile(&self, cr: &DynamicObject) -> Result<Action> {
        if cr.metadata.deletion_timestamp.is_some() {
            debug!(component = %self.config.name, "组件 CR 正在删除，跳过");
            return Ok(Action::await_change());
        }

        let result = self.deploy(cr).await;
        let condition = match &result {
            Ok(rendered) => self.readiness(rendered).await?,
            Err(e) => Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                REASON_ERROR,
                e.to_string(),
            ),
        };

        let mut conditions = conditions_of(cr);
        set_status_condition(&mut conditions, condition);
        let status = json!({
            "conditions": conditions,
            "observedGeneration": cr.metadata.generation,
        });
        let gvk = Gvk::of(cr)?;
        self.cluster
            .patch_status(&gvk, cr.metadata.namespace.as_deref(), &cr.name_any(), &status)
            .await?;

        result?;
        Ok(Action::requeue(REQUEUE_INTERVAL))
    }

    async fn deploy(&self, cr: &DynamicObject) -> Result<Vec<DynamicObject>> {
        let params: BTreeMap<String, String> =
            match resources::nested_field(&cr.data, &["spec", "params"]) {
                Some(value) => serde_json::from_value(value.clone())?,
                None => BTreeMap::new(),
            };
        let rendered = self.source.render(&params)?;

        let rr = ReconciliationRequest {
            client: self.cluster.clone(),
            instance: InstanceRef::from_dynamic(cr)?,
            resources: rendered,
            release: self.release.clone(),
            manager: self.manager.clone(),
        };
        self.action.run(&rr).await?;
        Ok(rr.resources)
    }

    async fn readiness(&self, rendered: &[DynamicObject]) -> Result<Condition> {
        let mut not_ready = Vec::new();
        for obj in rendered {
            let gvk = Gvk::of(obj)?;
            if !gvk.is(DEPLOYMENT) {
                continue;
            }
            let live = ignore_not_found(
                self.cluster
                    .get(&gvk, obj.metadata.namespace.as_deref(), &obj.name_any())
                    .await,
            )?;
            if !live.as_ref().map_or(false, deployment_available) {
                not_ready.push(obj.name_any());
            }
        }

        if not_ready.is_empty() {
            return Ok(Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                REASON_READY,
                "Component is ready",
            ));
        }
        not_ready.sort();
        Ok(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_DEPLOYMENTS_NOT_READY,
            format!("Some deployments are not ready: {}", not_ready.join(",")),
        ))
    }

    /// 处理错误
    pub fn handle_error(&self, cr: &DynamicObject, error: &Error) -> Action {
        error!("协调组件 {} 失败: {}", cr.name_any(), error);
        Action::requeue(ERROR_REQUEUE_INTERVAL)
    }
}
