//! 资源协调模块
//!
//! 该模块负责协调顶层 Platform 资源：依次处理注册表中的每个组件，
//! 根据管理状态创建或删除组件 CR，读取各组件的 Ready 条件，
//! 并汇总为 Platform 的 Available/Ready 条件与阶段。

use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use stratus_common::error::ignore_not_found;
use stratus_common::metadata::PLATFORM_GROUP;
use stratus_common::{
    conditions_of, is_status_condition_true, resources, set_status_condition, Condition,
    ConditionStatus, Error, Gvk, Result, CONDITION_AVAILABLE, CONDITION_PROGRESSING,
    CONDITION_READY,
};
use tracing::{debug, error, info, warn};

use crate::client::{ClusterClient, WriteParams};
use crate::crd::{
    ManagementState, Platform, PlatformStatus, Release, PHASE_NOT_READY, PHASE_PROGRESSING,
    PHASE_READY,
};
use crate::ownership::set_controller_reference;
use crate::registry::{ComponentHandler, Registry};
use crate::request::InstanceRef;

/// Platform 控制器的字段所有者
pub const PLATFORM_CONTROLLER: &str = "platform";

/// 可用原因
pub const REASON_AVAILABLE: &str = "Available";
/// 降级原因
pub const REASON_DEGRADED: &str = "Degraded";
/// 就绪原因
pub const REASON_READY: &str = "Ready";
/// 未就绪原因
pub const REASON_NOT_READY: &str = "NotReady";
/// 首次调谐原因
pub const REASON_RECONCILE_INIT: &str = "ReconcileInit";

/// 成功调谐后的重新检查间隔
const REQUEUE_INTERVAL: Duration = Duration::from_secs(300);
/// 出错后的重试间隔
const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);

/// Platform 的 GVK
pub fn platform_gvk() -> Gvk {
    Gvk::new(PLATFORM_GROUP, "v1", "Platform")
}

/// 写入可用性条件
pub fn set_availability(conditions: &mut Vec<Condition>, err: Option<&Error>) {
    let condition = match err {
        None => Condition::new(
            CONDITION_AVAILABLE,
            ConditionStatus::True,
            REASON_AVAILABLE,
            "Platform resource reconciled successfully",
        ),
        Some(err) => Condition::new(
            CONDITION_AVAILABLE,
            ConditionStatus::False,
            REASON_DEGRADED,
            format!("Platform resource reconciled with errors: {}", err),
        ),
    };
    set_status_condition(conditions, condition);
}

/// 写入就绪条件，未就绪的组件按名称排序后列出
pub fn set_readiness(conditions: &mut Vec<Condition>, mut non_ready: Vec<String>) {
    let condition = if non_ready.is_empty() {
        Condition::new(CONDITION_READY, ConditionStatus::True, REASON_READY, "Ready")
    } else {
        non_ready.sort();
        Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            REASON_NOT_READY,
            format!("Some components are not ready: {}", non_ready.join(",")),
        )
    };
    set_status_condition(conditions, condition);
}

/// 对单个组件执行管理状态对应的操作
async fn reconcile_component(
    client: &dyn ClusterClient,
    owner: &InstanceRef,
    state: &ManagementState,
    cr: &DynamicObject,
) -> Result<()> {
    let gvk = Gvk::of(cr)?;
    let result = match state {
        ManagementState::Managed => apply_component(client, owner, cr).await,
        ManagementState::Removed => {
            let deleted = client
                .delete(&gvk, cr.metadata.namespace.as_deref(), &cr.name_any())
                .await;
            ignore_not_found(deleted).map(|_| ())
        }
        other => Err(Error::UnsupportedManagementState(other.to_string())),
    };
    result.map_err(|e| Error::deploy(gvk.to_string(), resources::namespaced_name(cr), e))
}

async fn apply_component(
    client: &dyn ClusterClient,
    owner: &InstanceRef,
    cr: &DynamicObject,
) -> Result<()> {
    let mut obj = cr.clone();
    set_controller_reference(owner, &mut obj)?;
    let applied = client
        .apply(&obj, &WriteParams::forced(PLATFORM_CONTROLLER))
        .await;
    ignore_not_found(applied).map(|_| ())
}

/// 依次调谐所有已注册组件并汇总状态
///
/// 单个组件的失败不会中断循环，所有错误合并后返回。无论成功与否，
/// `platform.status` 都会被更新。
pub async fn reconcile_components(
    client: &dyn ClusterClient,
    registry: &Registry,
    platform: &mut Platform,
    release: &Release,
) -> Result<()> {
    let owner = InstanceRef::from_resource(&*platform)?;
    let mut errors: Vec<Error> = Vec::new();
    let mut non_ready: Vec<String> = Vec::new();

    for handler in registry.handlers() {
        if let Err(e) = reconcile_handler(
            client,
            handler.as_ref(),
            &owner,
            platform,
            &mut errors,
            &mut non_ready,
        )
        .await
        {
            errors.push(e);
        }
    }

    let err = Error::aggregate(errors);
    let status = platform.status.get_or_insert_with(PlatformStatus::default);
    status.observed_generation = platform.metadata.generation;
    status.release = Some(release.clone());

    set_availability(&mut status.conditions, err.as_ref());
    set_readiness(&mut status.conditions, non_ready);

    let ready = is_status_condition_true(&status.conditions, CONDITION_AVAILABLE)
        && is_status_condition_true(&status.conditions, CONDITION_READY);
    status.phase = Some(if ready { PHASE_READY } else { PHASE_NOT_READY }.to_string());

    match err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn reconcile_handler(
    client: &dyn ClusterClient,
    handler: &dyn ComponentHandler,
    owner: &InstanceRef,
    platform: &mut Platform,
    errors: &mut Vec<Error>,
    non_ready: &mut Vec<String>,
) -> Result<()> {
    let name = handler.name();
    let state = handler.management_state(platform);
    let cr = handler.new_cr_object(platform)?;
    debug!(component = %name, state = %state, "调谐组件");

    if let Err(e) = reconcile_component(client, owner, &state, &cr).await {
        warn!(component = %name, "组件调谐失败: {}", e);
        errors.push(e);
    }

    let gvk = Gvk::of(&cr)?;
    let current = match client
        .get(&gvk, cr.metadata.namespace.as_deref(), &cr.name_any())
        .await
    {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => cr,
        Err(e) => return Err(e),
    };

    if let Err(e) = handler.update_platform_status(platform, &current) {
        errors.push(e);
    }

    if state == ManagementState::Managed
        && !is_status_condition_true(&conditions_of(&current), CONDITION_READY)
    {
        non_ready.push(name);
    }
    Ok(())
}

/// Platform 协调器
pub struct Reconciler {
    /// 集群客户端
    client: Arc<dyn ClusterClient>,
    /// 组件注册表
    registry: Arc<Registry>,
    /// 发布版本信息
    release: Release,
}

impl Reconciler {
    /// 创建新的协调器
    pub fn new(client: Arc<dyn ClusterClient>, registry: Arc<Registry>, release: Release) -> Self {
        Self {
            client,
            registry,
            release,
        }
    }

    /// 协调 Platform 资源
    pub async fn reconcile(&self, platform: Arc<Platform>) -> Result<Action> {
        let name = platform.name_any();
        info!("协调 Platform {}", name);

        let mut platform = (*platform).clone();
        let uninitialized = platform
            .status
            .as_ref()
            .map_or(true, |s| s.conditions.is_empty());
        if uninitialized {
            if let Err(e) = self.initialize_status(&mut platform).await {
                warn!("初始化 Platform {} 状态失败: {}", name, e);
            }
        }

        let result = reconcile_components(
            self.client.as_ref(),
            &self.registry,
            &mut platform,
            &self.release,
        )
        .await;

        self.update_status(&platform).await?;

        match result {
            Ok(()) => {
                info!("Platform {} 调谐完成", name);
                Ok(Action::requeue(REQUEUE_INTERVAL))
            }
            Err(e) => Err(e),
        }
    }

    /// 首次调谐前写入 Progressing 状态
    async fn initialize_status(&self, platform: &mut Platform) -> Result<()> {
        let status = platform.status.get_or_insert_with(PlatformStatus::default);
        status.phase = Some(PHASE_PROGRESSING.to_string());
        set_status_condition(
            &mut status.conditions,
            Condition::new(
                CONDITION_PROGRESSING,
                ConditionStatus::True,
                REASON_RECONCILE_INIT,
                "Initializing Platform resource",
            ),
        );
        self.update_status(platform).await
    }

    /// 以 merge patch 写入 status 子资源
    async fn update_status(&self, platform: &Platform) -> Result<()> {
        let status = serde_json::to_value(platform.status.clone().unwrap_or_default())?;
        self.client
            .patch_status(&platform_gvk(), None, &platform.name_any(), &status)
            .await?;
        debug!("已更新 Platform {} 状态", platform.name_any());
        Ok(())
    }

    /// 处理错误
    pub fn handle_error(&self, platform: Arc<Platform>, error: &Error) -> Action {
        error!("协调 Platform {} 失败: {}", platform.name_any(), error);

        // 短时间后重试
        Action::requeue(ERROR_REQUEUE_INTERVAL)
    }
}
