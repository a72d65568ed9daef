//! 错误处理模块
//!
//! 该模块提供 Stratus 项目的统一错误处理机制。错误信息会被写入平台资源的
//! Condition 消息中，因此 `Display` 文本保持稳定的英文格式。

use std::fmt;
use std::io;
use thiserror::Error;

/// Stratus 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 对象不存在
    #[error("{gvk} {name} not found")]
    NotFound {
        /// 对象的 GroupVersionKind
        gvk: String,
        /// 对象名称（namespace/name）
        name: String,
    },

    /// 对象已存在
    #[error("{gvk} {name} already exists")]
    AlreadyExists {
        /// 对象的 GroupVersionKind
        gvk: String,
        /// 对象名称（namespace/name）
        name: String,
    },

    /// API Server 返回的其他错误
    #[error("api error ({code} {reason}): {message}")]
    Api {
        /// HTTP 状态码
        code: u16,
        /// 机器可读原因
        reason: String,
        /// 错误消息
        message: String,
    },

    /// kube-rs 客户端错误
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// 嵌套字段访问时遇到意外的类型
    #[error("malformed field {path}: {message}")]
    Structural {
        /// 字段路径，如 spec.template.spec.containers
        path: String,
        /// 描述
        message: String,
    },

    /// 不支持的管理状态
    #[error("unsupported management state: {0}")]
    UnsupportedManagementState(String),

    /// 对象已被其他控制器拥有
    #[error("object {name} is already owned by another controller {owner}")]
    AlreadyOwned {
        /// 对象名称
        name: String,
        /// 现有控制器引用（kind/name）
        owner: String,
    },

    /// 部署单个资源失败
    #[error("failure deploying {gvk} {name}: {source}")]
    Deploy {
        /// 资源的 GroupVersionKind
        gvk: String,
        /// 资源名称
        name: String,
        /// 底层错误
        #[source]
        source: Box<Error>,
    },

    /// 多个累积的错误
    #[error("{0}")]
    Aggregate(Errors),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 序列化/反序列化错误
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON 错误
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 错误
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O 错误
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Stratus 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// 创建结构性错误
    pub fn structural(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Structural {
            path: path.into(),
            message: message.into(),
        }
    }

    /// 将错误包装为带有资源标识的部署错误
    pub fn deploy(gvk: impl Into<String>, name: impl Into<String>, source: Error) -> Self {
        Self::Deploy {
            gvk: gvk.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// 是否为 NotFound（包括被包装的情况）
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Api { code, .. } => *code == 404,
            Self::Deploy { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// 是否为 AlreadyExists
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Api { code, reason, .. } => *code == 409 && reason == "AlreadyExists",
            Self::Deploy { source, .. } => source.is_already_exists(),
            _ => false,
        }
    }

    /// 合并多个错误；空列表返回 `None`，单个错误原样返回
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(Errors(errors))),
        }
    }
}

/// 忽略 NotFound 错误
pub fn ignore_not_found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// 累积的错误列表
#[derive(Debug)]
pub struct Errors(pub Vec<Error>);

impl Errors {
    /// 错误数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n\t* {}", e)?;
        }
        Ok(())
    }
}
