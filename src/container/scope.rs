//! 请求作用域管理
//!
//! 每个请求持有一个私有作用域，缓存Scoped生命周期的实例。
//! 作用域状态机：Active -> Ending -> Ended，只有 Active -> Ending
//! 这一次转换会排空缓存，因此释放逻辑每个作用域恰好执行一次。
//! 作用域被丢弃（请求取消）时由 Drop 兜底，将释放工作转交运行时，
//! 保证所有退出路径都执行清理。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

use super::registry::Registry;
use super::{CapabilityId, CapabilityObject};
use crate::errors::ContainerError;

/// 作用域状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    /// 作用域已激活，可以解析Scoped实例
    Active,
    /// 作用域正在结束，释放逻辑已被某个调用方接管
    Ending,
    /// 作用域已结束
    Ended,
}

impl ScopeState {
    fn as_str(&self) -> &'static str {
        match self {
            ScopeState::Active => "active",
            ScopeState::Ending => "ending",
            ScopeState::Ended => "ended",
        }
    }
}

struct ScopeInner {
    state: ScopeState,
    cache: HashMap<CapabilityId, CapabilityObject>,
    creation_order: Vec<CapabilityId>,
    closed_at: Option<Instant>,
}

/// 单个请求的解析上下文
///
/// 缓存对请求私有，互斥锁仅用于内部可变性，不存在跨请求竞争。
pub struct Scope {
    id: Uuid,
    registry: Arc<Registry>,
    opened_at: Instant,
    inner: Mutex<ScopeInner>,
}

impl Scope {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self {
            id: Uuid::new_v4(),
            registry,
            opened_at: Instant::now(),
            inner: Mutex::new(ScopeInner {
                state: ScopeState::Active,
                cache: HashMap::new(),
                creation_order: Vec::new(),
                closed_at: None,
            }),
        }
    }

    /// 作用域标识
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 当前状态
    pub fn state(&self) -> ScopeState {
        self.inner.lock().state
    }

    /// 作用域持续时间（结束后为打开到结束的间隔）
    pub fn duration(&self) -> Duration {
        let inner = self.inner.lock();
        match inner.closed_at {
            Some(closed) => closed - self.opened_at,
            None => self.opened_at.elapsed(),
        }
    }

    /// 缓存中已存在的Scoped实例
    pub(crate) fn cached(&self, id: &CapabilityId) -> Option<CapabilityObject> {
        self.inner.lock().cache.get(id).cloned()
    }

    /// 写入Scoped实例缓存
    ///
    /// 返回作用域内的权威实例：并发构造同一标识时先写入者胜出，
    /// 后到者拿到已缓存的实例，保证作用域内身份稳定。
    pub(crate) fn store(
        &self,
        id: CapabilityId,
        object: CapabilityObject,
    ) -> Result<CapabilityObject, ContainerError> {
        let mut inner = self.inner.lock();
        if inner.state != ScopeState::Active {
            return Err(ContainerError::ScopeClosed {
                scope_id: self.id,
                state: inner.state.as_str().to_string(),
            });
        }
        if let Some(existing) = inner.cache.get(&id) {
            return Ok(existing.clone());
        }
        inner.creation_order.push(id.clone());
        inner.cache.insert(id, object.clone());
        Ok(object)
    }

    /// 接管释放工作：Active -> Ending
    ///
    /// 返回按逆构造顺序排列的实例（后构造的依赖方排在前面）。
    /// 非Active状态返回None，保证释放至多被接管一次。
    fn begin_close(&self) -> Option<Vec<(CapabilityId, CapabilityObject)>> {
        let mut inner = self.inner.lock();
        if inner.state != ScopeState::Active {
            return None;
        }
        inner.state = ScopeState::Ending;
        let mut cache = std::mem::take(&mut inner.cache);
        let order = std::mem::take(&mut inner.creation_order);
        Some(
            order
                .into_iter()
                .rev()
                .filter_map(|id| cache.remove(&id).map(|object| (id, object)))
                .collect(),
        )
    }

    fn mark_ended(&self) {
        let mut inner = self.inner.lock();
        inner.state = ScopeState::Ended;
        inner.closed_at = Some(Instant::now());
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        // 兜底：请求被取消时作用域未经历显式关闭
        if let Some(work) = self.begin_close() {
            let registry = self.registry.clone();
            let scope_id = self.id;
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        release_all(registry, scope_id, work).await;
                        tracing::debug!(%scope_id, "scope released by drop backstop");
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        %scope_id,
                        instances = work.len(),
                        "scope dropped outside a runtime; release hooks skipped"
                    );
                }
            }
        }
    }
}

async fn release_all(
    registry: Arc<Registry>,
    scope_id: Uuid,
    work: Vec<(CapabilityId, CapabilityObject)>,
) {
    for (id, object) in work {
        let hook = registry
            .lookup(&id)
            .ok()
            .and_then(|binding| binding.release().cloned());
        if let Some(hook) = hook {
            if let Err(error) = hook.release(object).await {
                tracing::warn!(%scope_id, capability = %id, %error, "release hook failed");
            }
        }
    }
}

/// 作用域管理器
///
/// 负责按请求开启作用域并保证其关闭。
#[derive(Clone)]
pub struct ScopeManager {
    registry: Arc<Registry>,
}

impl ScopeManager {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// 开启新的空作用域
    pub fn open_scope(&self) -> Scope {
        let scope = Scope::new(self.registry.clone());
        tracing::trace!(scope_id = %scope.id(), "scope opened");
        scope
    }

    /// 关闭作用域并释放全部Scoped实例
    ///
    /// 幂等：重复调用是无害的空操作。释放工作提交给独立任务执行，
    /// 调用方即使在等待期间被取消，清理仍会完成。
    pub async fn close_scope(&self, scope: &Scope) {
        let Some(work) = scope.begin_close() else {
            return;
        };
        let registry = self.registry.clone();
        let scope_id = scope.id();
        let count = work.len();
        let handle = tokio::spawn(async move {
            release_all(registry, scope_id, work).await;
        });
        let _ = handle.await;
        scope.mark_ended();
        tracing::trace!(%scope_id, released = count, duration = ?scope.duration(), "scope closed");
    }
}
