//! 能力容器核心模型
//!
//! 提供容器的基础构件：
//! - 能力标识（CapabilityId）
//! - 生命周期策略（Lifetime）
//! - 绑定（Binding）：能力标识 + 构造配方 + 生命周期
//! - 构造配方与释放钩子trait及其闭包适配器

pub mod registry;
pub mod resolver;
pub mod scope;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::errors::BoxError;

/// 抽象契约的不透明标识
///
/// 在同一个注册表内必须唯一，克隆代价低廉。
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CapabilityId(Arc<str>);

impl CapabilityId {
    /// 创建新的能力标识
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// 获取标识文本
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CapabilityId({})", self.0)
    }
}

impl From<&str> for CapabilityId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for CapabilityId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// 实例生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// 单例 - 整个进程生命周期只有一个实例
    Singleton,
    /// 作用域 - 同一请求作用域内共享实例
    Scoped,
    /// 瞬态 - 每次解析都创建新实例
    Transient,
}

/// 类型擦除的已构造实例
pub type CapabilityObject = Arc<dyn Any + Send + Sync>;

/// 将任意值包装为类型擦除的能力实例
///
/// 契约类型以 `Arc<dyn Contract>` 形式传入，解析方以相同类型取回。
pub fn capability<T: Send + Sync + 'static>(value: T) -> CapabilityObject {
    Arc::new(value)
}

/// 按声明顺序组装好的构造依赖
pub struct ResolvedDeps {
    entries: Vec<(CapabilityId, CapabilityObject)>,
}

impl ResolvedDeps {
    pub(crate) fn new(entries: Vec<(CapabilityId, CapabilityObject)>) -> Self {
        Self { entries }
    }

    /// 依赖数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按声明位置取出依赖并还原具体类型
    pub fn get<T: Clone + 'static>(&self, index: usize) -> Result<T, BoxError> {
        let (id, object) = self
            .entries
            .get(index)
            .ok_or_else(|| format!("dependency index {index} is out of range"))?;
        object
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| format!("dependency '{id}' has unexpected concrete type").into())
    }

    /// 按声明位置取出未还原类型的依赖实例
    pub fn object(&self, index: usize) -> Option<&CapabilityObject> {
        self.entries.get(index).map(|(_, object)| object)
    }
}

/// 构造配方trait
///
/// 配方接收按声明顺序组装好的依赖，产出类型擦除的实例。
/// 构造过程中允许执行I/O。
#[async_trait]
pub trait ConstructionRecipe: Send + Sync {
    /// 创建实例
    async fn construct(&self, deps: ResolvedDeps) -> Result<CapabilityObject, BoxError>;
}

/// 函数式构造配方
struct FnRecipe {
    factory: Box<
        dyn Fn(ResolvedDeps) -> BoxFuture<'static, Result<CapabilityObject, BoxError>>
            + Send
            + Sync,
    >,
}

#[async_trait]
impl ConstructionRecipe for FnRecipe {
    async fn construct(&self, deps: ResolvedDeps) -> Result<CapabilityObject, BoxError> {
        (self.factory)(deps).await
    }
}

/// 将异步闭包包装为构造配方
pub fn recipe<F, Fut>(factory: F) -> Arc<dyn ConstructionRecipe>
where
    F: Fn(ResolvedDeps) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<CapabilityObject, BoxError>> + Send + 'static,
{
    Arc::new(FnRecipe {
        factory: Box::new(move |deps| Box::pin(factory(deps))),
    })
}

/// 作用域结束时的实例释放钩子
#[async_trait]
pub trait ReleaseHook: Send + Sync {
    /// 释放实例持有的资源
    async fn release(&self, instance: CapabilityObject) -> Result<(), BoxError>;
}

/// 函数式释放钩子
struct FnRelease {
    hook: Box<dyn Fn(CapabilityObject) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>,
}

#[async_trait]
impl ReleaseHook for FnRelease {
    async fn release(&self, instance: CapabilityObject) -> Result<(), BoxError> {
        (self.hook)(instance).await
    }
}

/// 将异步闭包包装为释放钩子
pub fn release_hook<F, Fut>(hook: F) -> Arc<dyn ReleaseHook>
where
    F: Fn(CapabilityObject) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(FnRelease {
        hook: Box::new(move |instance| Box::pin(hook(instance))),
    })
}

/// 能力绑定：标识 + 构造配方 + 生命周期
///
/// 注册后不可变更。
#[derive(Clone)]
pub struct Binding {
    id: CapabilityId,
    lifetime: Lifetime,
    dependencies: Vec<CapabilityId>,
    recipe: Arc<dyn ConstructionRecipe>,
    release: Option<Arc<dyn ReleaseHook>>,
}

impl Binding {
    /// 创建新的绑定
    pub fn new(
        id: impl Into<CapabilityId>,
        lifetime: Lifetime,
        recipe: Arc<dyn ConstructionRecipe>,
    ) -> Self {
        Self {
            id: id.into(),
            lifetime,
            dependencies: Vec::new(),
            recipe,
            release: None,
        }
    }

    /// 声明构造函数依赖（顺序即配方收到依赖的顺序）
    pub fn with_dependencies<I, D>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<CapabilityId>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// 声明作用域结束时的释放钩子
    pub fn with_release(mut self, hook: Arc<dyn ReleaseHook>) -> Self {
        self.release = Some(hook);
        self
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    pub fn dependencies(&self) -> &[CapabilityId] {
        &self.dependencies
    }

    pub(crate) fn recipe(&self) -> &Arc<dyn ConstructionRecipe> {
        &self.recipe
    }

    pub(crate) fn release(&self) -> Option<&Arc<dyn ReleaseHook>> {
        self.release.as_ref()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("lifetime", &self.lifetime)
            .field("dependencies", &self.dependencies)
            .field("has_release", &self.release.is_some())
            .finish()
    }
}
