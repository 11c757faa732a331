//! 能力解析器
//!
//! 按绑定声明的依赖列表递归构造实例图：
//! - 单例：`OnceCell` 双重检查初始化，并发首次解析至多构造一次
//! - 作用域：命中请求私有缓存则复用，否则构造并写回
//! - 瞬态：每次解析都构造
//!
//! 循环依赖通过解析栈（ResolutionGraph）在递归前检测，
//! 直接报错而不是耗尽调用栈。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::registry::Registry;
use super::scope::Scope;
use super::{Binding, CapabilityId, CapabilityObject, Lifetime, ResolvedDeps};
use crate::errors::ContainerError;

/// 单次解析调用的在途标识栈，用于循环依赖检测
pub struct ResolutionGraph {
    stack: Vec<CapabilityId>,
}

impl ResolutionGraph {
    fn new() -> Self {
        Self { stack: Vec::new() }
    }

    fn contains(&self, id: &CapabilityId) -> bool {
        self.stack.contains(id)
    }

    fn push(&mut self, id: CapabilityId) {
        self.stack.push(id);
    }

    fn pop(&mut self) {
        self.stack.pop();
    }

    /// 当前链路加上目标标识的快照
    fn chain_with(&self, id: &CapabilityId) -> Vec<CapabilityId> {
        let mut chain = self.stack.clone();
        chain.push(id.clone());
        chain
    }

    fn snapshot(&self) -> Vec<CapabilityId> {
        self.stack.clone()
    }
}

/// 内部统计信息（原子计数器）
#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    singleton_hits: AtomicUsize,
    singleton_misses: AtomicUsize,
    scoped_creations: AtomicUsize,
    transient_creations: AtomicUsize,
}

/// 解析器统计信息快照
#[derive(Debug, Clone)]
pub struct ContainerStats {
    pub total_resolutions: usize,
    pub singleton_hits: usize,
    pub singleton_misses: usize,
    pub scoped_creations: usize,
    pub transient_creations: usize,
}

impl ContainerStats {
    /// 单例缓存命中率
    pub fn hit_rate(&self) -> f64 {
        let total = self.singleton_hits + self.singleton_misses;
        if total == 0 {
            0.0
        } else {
            self.singleton_hits as f64 / total as f64
        }
    }
}

type ResolveFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CapabilityObject, ContainerError>> + Send + 'a>>;

/// 能力解析器
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<Registry>,
    stats: Arc<InnerStats>,
}

impl Resolver {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stats: Arc::new(InnerStats::default()),
        }
    }

    /// 在给定作用域内解析能力，返回类型擦除的实例
    pub async fn resolve(
        &self,
        id: &CapabilityId,
        scope: &Scope,
    ) -> Result<CapabilityObject, ContainerError> {
        let mut graph = ResolutionGraph::new();
        self.resolve_inner(id, scope, &mut graph).await
    }

    /// 解析并还原为注册时的具体类型
    pub async fn resolve_as<T: Clone + 'static>(
        &self,
        id: &CapabilityId,
        scope: &Scope,
    ) -> Result<T, ContainerError> {
        let object = self.resolve(id, scope).await?;
        object
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| ContainerError::TypeMismatch {
                id: id.clone(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// 统计信息快照
    pub fn stats(&self) -> ContainerStats {
        ContainerStats {
            total_resolutions: self.stats.total_resolutions.load(Ordering::Relaxed),
            singleton_hits: self.stats.singleton_hits.load(Ordering::Relaxed),
            singleton_misses: self.stats.singleton_misses.load(Ordering::Relaxed),
            scoped_creations: self.stats.scoped_creations.load(Ordering::Relaxed),
            transient_creations: self.stats.transient_creations.load(Ordering::Relaxed),
        }
    }

    fn resolve_inner<'a>(
        &'a self,
        id: &'a CapabilityId,
        scope: &'a Scope,
        graph: &'a mut ResolutionGraph,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            self.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

            // 递归前检测循环，单例在此检测避免 OnceCell 自锁
            if graph.contains(id) {
                return Err(ContainerError::CircularDependency {
                    chain: graph.chain_with(id),
                });
            }

            let binding = self.registry.lookup(id)?;
            match binding.lifetime() {
                Lifetime::Singleton => {
                    let cell = self.registry.singleton_cell(id);
                    if let Some(object) = cell.get() {
                        self.stats.singleton_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(object.clone());
                    }
                    self.stats.singleton_misses.fetch_add(1, Ordering::Relaxed);
                    // 竞争的首次解析在此排队，胜出者构造，其余等待取回
                    let object = cell
                        .get_or_try_init(|| self.construct(binding, scope, graph))
                        .await?;
                    Ok(object.clone())
                }
                Lifetime::Scoped => {
                    if let Some(object) = scope.cached(id) {
                        return Ok(object);
                    }
                    let object = self.construct(binding, scope, graph).await?;
                    self.stats.scoped_creations.fetch_add(1, Ordering::Relaxed);
                    scope.store(id.clone(), object)
                }
                Lifetime::Transient => {
                    let object = self.construct(binding, scope, graph).await?;
                    self.stats
                        .transient_creations
                        .fetch_add(1, Ordering::Relaxed);
                    Ok(object)
                }
            }
        })
    }

    /// 组装依赖并调用构造配方
    async fn construct(
        &self,
        binding: &Binding,
        scope: &Scope,
        graph: &mut ResolutionGraph,
    ) -> Result<CapabilityObject, ContainerError> {
        graph.push(binding.id().clone());

        let mut resolved = Vec::with_capacity(binding.dependencies().len());
        for dependency in binding.dependencies() {
            match self.resolve_inner(dependency, scope, graph).await {
                Ok(object) => resolved.push((dependency.clone(), object)),
                Err(error) => {
                    graph.pop();
                    return Err(error);
                }
            }
        }

        let result = binding.recipe().construct(ResolvedDeps::new(resolved)).await;
        let chain = graph.snapshot();
        graph.pop();

        result.map_err(|source| ContainerError::Construction { chain, source })
    }
}
