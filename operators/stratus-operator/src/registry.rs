//! 组件注册表
//!
//! 每种组件在进程启动时注册一个 `ComponentHandler`，注册表按注册顺序迭代。

use async_trait::async_trait;
use kube::api::DynamicObject;
use std::sync::Arc;
use stratus_common::{Error, Result};
use tracing::info;

use crate::components::ComponentContext;
use crate::crd::{ManagementState, Platform, Release};

/// 组件处理器
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComponentHandler: Send + Sync {
    /// 启动时初始化
    fn init(&self, release: &Release) -> Result<()>;

    /// 组件名称，即 Platform spec 中的键
    fn name(&self) -> String;

    /// 从 Platform spec 读取管理状态
    fn management_state(&self, platform: &Platform) -> ManagementState;

    /// 构造新的组件 CR 对象
    fn new_cr_object(&self, platform: &Platform) -> Result<DynamicObject>;

    /// 启动该组件自己的控制器
    async fn new_component_reconciler(&self, ctx: Arc<ComponentContext>) -> anyhow::Result<()>;

    /// 根据组件 CR 更新 Platform 状态
    fn update_platform_status(&self, platform: &mut Platform, cr: &DynamicObject) -> Result<()>;
}

/// 有序的组件注册表
#[derive(Default)]
pub struct Registry {
    handlers: Vec<Arc<dyn ComponentHandler>>,
}

impl Registry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册组件处理器
    pub fn add(&mut self, handler: Arc<dyn ComponentHandler>) {
        self.handlers.push(handler);
    }

    /// 按注册顺序返回处理器
    pub fn handlers(&self) -> &[Arc<dyn ComponentHandler>] {
        &self.handlers
    }

    /// 已注册的组件名称
    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// 已注册的组件数量
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// 是否没有注册任何组件
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 初始化所有处理器，单个失败不影响其他处理器，错误合并返回
    pub fn init(&self, release: &Release) -> Result<()> {
        let errors: Vec<Error> = self
            .handlers
            .iter()
            .filter_map(|h| h.init(release).err())
            .collect();

        match Error::aggregate(errors) {
            Some(err) => Err(err),
            None => {
                info!("已初始化 {} 个组件", self.handlers.len());
                Ok(())
            }
        }
    }
}
