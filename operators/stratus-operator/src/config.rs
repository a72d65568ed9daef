//! 配置管理模块
//!
//! 该模块负责加载 Operator 的配置：内置默认值、可选的 YAML/JSON 配置文件，
//! 以及前缀为 `STRATUS`、分隔符为 `__` 的环境变量覆盖。

use anyhow::{anyhow, bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crd::Release;
use crate::deploy::DeployMode;
use crate::ownership::OwnerSelector;

/// Operator 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// 部署模式：apply 或 patch
    #[serde(default)]
    pub deploy_mode: DeployMode,
    /// 缓存配置
    #[serde(default)]
    pub cache: CacheConfig,
    /// 指标服务器配置
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 发布版本信息
    #[serde(default)]
    pub release: Release,
    /// 组件列表，按顺序注册
    #[serde(default)]
    pub components: Vec<ComponentConfig>,
    /// 需要从已部署对象上移除的遗留所有者
    #[serde(default)]
    pub legacy_owners: Vec<LegacyOwnerConfig>,
}

/// 遗留所有者，按 API 组与类型匹配
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyOwnerConfig {
    /// API 组
    #[serde(default)]
    pub group: String,
    /// 类型
    pub kind: String,
}

/// 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,
    /// 条目有效期（秒）
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 600,
        }
    }
}

/// 指标服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// 监听地址
    pub listen_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// 单个组件的配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// 组件名称，对应 Platform spec 中的键
    pub name: String,
    /// 组件 CR 的类型
    pub kind: String,
    /// 清单目录
    pub manifests: PathBuf,
    /// 命名空间级资源的默认命名空间
    pub namespace: String,
    /// 清单参数，如镜像地址；参数名不区分大小写
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl OperatorConfig {
    /// 加载配置，未指定文件时只使用默认值与环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("deploy_mode", "apply")?
            .set_default("cache.enabled", true)?
            .set_default("cache.ttl_seconds", 600)?
            .set_default("metrics.listen_address", "0.0.0.0:8080")?;

        if let Some(path) = path {
            let config_file = path.to_str().ok_or_else(|| anyhow!("配置路径无效"))?;

            // 确定配置文件格式
            let format = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml") | Some("yml") => FileFormat::Yaml,
                Some("json") => FileFormat::Json,
                _ => bail!("不支持的配置文件格式，仅支持 YAML 或 JSON"),
            };
            builder = builder.add_source(File::with_name(config_file).format(format));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("STRATUS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("构建配置失败")?;

        let mut operator_config = config
            .try_deserialize::<OperatorConfig>()
            .context("配置格式错误")?;

        // 配置源会把键转换为小写，清单占位符统一使用大写参数名
        for component in &mut operator_config.components {
            component.params = std::mem::take(&mut component.params)
                .into_iter()
                .map(|(k, v)| (k.to_uppercase(), v))
                .collect();
        }
        operator_config.validate()?;
        Ok(operator_config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.metrics_address()?;

        let mut names = HashSet::new();
        for component in &self.components {
            if component.name.is_empty() || component.kind.is_empty() {
                bail!("组件必须同时设置 name 与 kind");
            }
            if !names.insert(component.name.as_str()) {
                bail!("组件 {} 重复配置", component.name);
            }
        }
        Ok(())
    }

    /// 指标服务器监听地址
    pub fn metrics_address(&self) -> Result<SocketAddr> {
        self.metrics
            .listen_address
            .parse()
            .with_context(|| format!("无效的指标监听地址: {}", self.metrics.listen_address))
    }

    /// 缓存有效期
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_seconds)
    }

    /// 遗留所有者选择器
    pub fn legacy_owner_selectors(&self) -> Vec<OwnerSelector> {
        self.legacy_owners
            .iter()
            .map(|o| OwnerSelector::kind(&o.group, &o.kind))
            .collect()
    }
}
