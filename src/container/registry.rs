//! 绑定注册表
//!
//! 注册表有两个阶段：
//! - 开放阶段（RegistryBuilder）：启动期顺序注册绑定，重复注册直接报错
//! - 封存阶段（Registry）：`seal()` 消耗构建器完成单向状态转换，
//!   之后只读，查找无需加锁

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use super::{Binding, CapabilityId, CapabilityObject};
use crate::errors::ContainerError;

/// 开放阶段的注册表构建器
///
/// `seal()` 按值消耗构建器，封存后不存在任何再注册入口。
#[derive(Default)]
pub struct RegistryBuilder {
    bindings: HashMap<CapabilityId, Binding>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册绑定
    ///
    /// 绑定不可覆盖：相同标识的二次注册返回 `DuplicateBinding`，
    /// 已有绑定保持不变。
    pub fn register(&mut self, binding: Binding) -> Result<&mut Self, ContainerError> {
        if self.bindings.contains_key(binding.id()) {
            return Err(ContainerError::DuplicateBinding(binding.id().clone()));
        }
        self.bindings.insert(binding.id().clone(), binding);
        Ok(self)
    }

    /// 已注册绑定数量
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 封存注册表，进入只读服务阶段
    pub fn seal(self) -> Registry {
        tracing::debug!(bindings = self.bindings.len(), "registry sealed");
        Registry {
            bindings: self.bindings,
            singletons: DashMap::new(),
        }
    }
}

/// 封存后的只读注册表
///
/// 查找走普通HashMap，无锁；单例缓存单元按需创建，
/// 由 `OnceCell` 保证每个标识至多构造一次。
pub struct Registry {
    bindings: HashMap<CapabilityId, Binding>,
    singletons: DashMap<CapabilityId, Arc<OnceCell<CapabilityObject>>>,
}

impl Registry {
    /// 查找绑定
    pub fn lookup(&self, id: &CapabilityId) -> Result<&Binding, ContainerError> {
        self.bindings
            .get(id)
            .ok_or_else(|| ContainerError::UnboundCapability(id.clone()))
    }

    /// 检查标识是否已绑定
    pub fn is_bound(&self, id: &CapabilityId) -> bool {
        self.bindings.contains_key(id)
    }

    /// 获取所有已注册的能力标识
    pub fn ids(&self) -> Vec<CapabilityId> {
        self.bindings.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// 获取单例缓存单元
    pub(crate) fn singleton_cell(&self, id: &CapabilityId) -> Arc<OnceCell<CapabilityObject>> {
        self.singletons
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}
