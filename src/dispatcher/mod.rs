//! 请求分发器
//!
//! 将入站请求编排为固定的阶段序列：
//! 路由匹配 -> 开启作用域 -> 解析处理器图 -> 绑定输入 -> 校验 ->
//! 执行处理器 -> 关闭作用域 -> 返回对外结果。
//! 无论处理器成功、报错、恐慌还是请求被取消，作用域都保证关闭。

pub mod request;
pub mod router;

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use uuid::Uuid;

use crate::config::DispatcherConfig;
use crate::container::registry::Registry;
use crate::container::resolver::{ContainerStats, Resolver};
use crate::container::scope::{Scope, ScopeManager};
use crate::container::CapabilityId;
use crate::errors::{ContainerError, RouteError};
use crate::validation::{RuleSet, Violation};

use request::{BoundRequest, DispatchOutcome, HttpMethod, Request, SharedHandler};
use router::{RouteDescriptor, RoutePattern, RouteTable};

/// 单个请求的处理阶段
///
/// Failed 是吸收态，从任何非终结阶段进入，但对外报告前
/// 一定先经过 ScopeClosing。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Routing,
    ScopeOpen,
    Resolving,
    Validating,
    Executing,
    ScopeClosing,
    Done,
    Failed,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routing => "routing",
            Self::ScopeOpen => "scope_open",
            Self::Resolving => "resolving",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::ScopeClosing => "scope_closing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 启动期的分发器装配器
pub struct DispatcherBuilder {
    table: RouteTable,
    config: DispatcherConfig,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            table: RouteTable::new(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// 注册路由
    pub fn route(
        self,
        method: &str,
        pattern: &str,
        handler: impl Into<CapabilityId>,
    ) -> Result<Self, RouteError> {
        self.add_route(method, pattern, handler.into(), None)
    }

    /// 注册路由并附带输入模型的校验规则集
    pub fn route_with_rules(
        self,
        method: &str,
        pattern: &str,
        handler: impl Into<CapabilityId>,
        rules: RuleSet,
    ) -> Result<Self, RouteError> {
        self.add_route(method, pattern, handler.into(), Some(rules))
    }

    fn add_route(
        mut self,
        method: &str,
        pattern: &str,
        handler: CapabilityId,
        rules: Option<RuleSet>,
    ) -> Result<Self, RouteError> {
        let method =
            HttpMethod::parse(method).ok_or_else(|| RouteError::InvalidMethod(method.to_string()))?;
        let pattern = RoutePattern::parse(pattern)?;
        self.table.add(method, pattern, handler, rules)?;
        Ok(self)
    }

    /// 绑定封存后的注册表，完成装配
    pub fn build(self, registry: Arc<Registry>) -> Dispatcher {
        Dispatcher {
            resolver: Resolver::new(registry.clone()),
            scopes: ScopeManager::new(registry),
            table: self.table,
            config: self.config,
        }
    }
}

/// 请求分发器
pub struct Dispatcher {
    resolver: Resolver,
    scopes: ScopeManager,
    table: RouteTable,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// 启动自检：接收流量前把每条路由的处理器图急切解析一遍
    ///
    /// 未绑定、循环依赖、构造失败等程序员错误在这里快速暴露。
    pub async fn preflight(&self) -> Result<(), ContainerError> {
        let scope = self.scopes.open_scope();
        let mut result = Ok(());
        for route in self.table.iter() {
            if let Err(error) = self
                .resolver
                .resolve_as::<SharedHandler>(route.handler(), &scope)
                .await
            {
                tracing::error!(handler = %route.handler(), %error, "preflight resolution failed");
                result = Err(error);
                break;
            }
        }
        self.scopes.close_scope(&scope).await;
        if result.is_ok() {
            tracing::info!(routes = self.table.len(), "preflight passed");
        }
        result
    }

    /// 按配置执行启动流程：`preflight` 开启时先完成自检再接收流量
    pub async fn start(&self) -> Result<(), ContainerError> {
        if self.config.preflight {
            self.preflight().await?;
        }
        Ok(())
    }

    /// 处理一个入站请求
    pub async fn dispatch(&self, request: Request) -> DispatchOutcome {
        let request_id = Uuid::new_v4();
        tracing::debug!(
            %request_id,
            method = %request.method,
            path = %request.path,
            phase = %RequestPhase::Routing,
            "request received"
        );

        // 路由匹配
        let Some(method) = HttpMethod::parse(&request.method) else {
            tracing::debug!(%request_id, method = %request.method, "unknown method");
            return DispatchOutcome::NotFound;
        };
        let Some((route, params)) = self.table.find(method, &request.path) else {
            tracing::debug!(%request_id, path = %request.path, "no matching route");
            return DispatchOutcome::NotFound;
        };

        if let Some(violation) = self.check_body_size(&request) {
            return DispatchOutcome::Invalid {
                violations: vec![violation],
            };
        }

        // 开启作用域；之后无论哪条路径退出都会关闭
        tracing::trace!(%request_id, phase = %RequestPhase::ScopeOpen, "opening scope");
        let scope = self.scopes.open_scope();

        let outcome = self
            .execute_in_scope(route, params, &request, &scope, request_id)
            .await;

        tracing::trace!(%request_id, phase = %RequestPhase::ScopeClosing, "closing scope");
        self.scopes.close_scope(&scope).await;

        let phase = if matches!(outcome, DispatchOutcome::Failed) {
            RequestPhase::Failed
        } else {
            RequestPhase::Done
        };
        tracing::debug!(%request_id, phase = %phase, "request finished");
        outcome
    }

    /// 解析器统计信息
    pub fn container_stats(&self) -> ContainerStats {
        self.resolver.stats()
    }

    async fn execute_in_scope(
        &self,
        route: &RouteDescriptor,
        params: HashMap<String, String>,
        request: &Request,
        scope: &Scope,
        request_id: Uuid,
    ) -> DispatchOutcome {
        // 解析处理器及其依赖图
        let handler: SharedHandler = match self
            .resolver
            .resolve_as::<SharedHandler>(route.handler(), scope)
            .await
        {
            Ok(handler) => handler,
            Err(error) => {
                tracing::error!(
                    %request_id,
                    phase = %RequestPhase::Resolving,
                    handler = %route.handler(),
                    %error,
                    "handler resolution failed"
                );
                return DispatchOutcome::Failed;
            }
        };

        // 绑定输入模型
        let bound = BoundRequest {
            path_params: params,
            body: request.body.clone(),
            headers: request.headers.clone(),
        };

        // 校验边界：失败则跳过处理器
        if let Some(rules) = route.rules() {
            let violations = rules.validate(&bound.body);
            if !violations.is_empty() {
                tracing::debug!(
                    %request_id,
                    phase = %RequestPhase::Validating,
                    count = violations.len(),
                    "validation failed"
                );
                return DispatchOutcome::Invalid { violations };
            }
        }

        // 执行处理器，恐慌与业务错误都被隔离在本次请求内
        tracing::trace!(%request_id, phase = %RequestPhase::Executing, "invoking handler");
        match AssertUnwindSafe(handler.handle(bound)).catch_unwind().await {
            Ok(Ok(payload)) => DispatchOutcome::Success { payload },
            Ok(Err(error)) => {
                tracing::error!(
                    %request_id,
                    phase = %RequestPhase::Executing,
                    handler = %route.handler(),
                    error = %error,
                    "handler returned an error"
                );
                DispatchOutcome::Failed
            }
            Err(_) => {
                tracing::error!(
                    %request_id,
                    phase = %RequestPhase::Executing,
                    handler = %route.handler(),
                    "handler panicked"
                );
                DispatchOutcome::Failed
            }
        }
    }

    fn check_body_size(&self, request: &Request) -> Option<Violation> {
        let max = self.config.max_body_bytes?;
        let size = serde_json::to_vec(&request.body).map(|b| b.len()).ok()?;
        if size > max {
            Some(Violation {
                field: "body".to_string(),
                message: format!("request body exceeds maximum size of {max} bytes"),
            })
        } else {
            None
        }
    }
}
