use crate::container::CapabilityId;
use thiserror::Error;

/// 构造配方与处理器边界使用的通用错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn chain_display(chain: &[CapabilityId]) -> String {
    chain
        .iter()
        .map(CapabilityId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// 容器错误：注册与解析阶段的程序员错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("capability '{0}' is already bound")]
    DuplicateBinding(CapabilityId),
    #[error("capability '{0}' is not bound")]
    UnboundCapability(CapabilityId),
    #[error("circular dependency detected: {}", chain_display(.chain))]
    CircularDependency { chain: Vec<CapabilityId> },
    #[error("construction failed (resolution chain: {}): {}", chain_display(.chain), .source)]
    Construction {
        chain: Vec<CapabilityId>,
        source: BoxError,
    },
    #[error("capability '{id}' has unexpected concrete type, expected {expected}")]
    TypeMismatch {
        id: CapabilityId,
        expected: &'static str,
    },
    #[error("scope {scope_id} is no longer active (state: {state})")]
    ScopeClosed { scope_id: uuid::Uuid, state: String },
}

/// 路由表错误：启动期注册路由时产生
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("route '{method} {pattern}' is already registered")]
    DuplicateRoute { method: String, pattern: String },
    #[error("unsupported HTTP method '{0}'")]
    InvalidMethod(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Required configuration field '{0}' is missing or invalid")]
    FieldInvalid(String),
}

/// 统一错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),
    #[error("Route error: {0}")]
    Route(#[from] RouteError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
