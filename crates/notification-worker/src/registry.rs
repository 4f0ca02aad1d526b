//! 后端注册表
//!
//! 按渠道 slug 与数字 id 索引所有 `BackendAdapter` 实例。
//!
//! ## 设计说明
//!
//! 注册表只在进程启动时通过 `BackendRegistryBuilder` 构建一次，之后不可变，
//! 以 `Arc` 在所有工作任务间共享。查找失败返回类型化的 `UnknownBackend`。
//!
//! ## 使用示例
//!
//! ```ignore
//! let registry = BackendRegistry::builder()
//!     .register(Arc::new(EmailBackend::new(transport, config)))?
//!     .build();
//! let backend = registry.get(&Medium::new("email"))?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use notice_shared::error::NoticeError;
use notice_shared::models::Medium;
use tracing::{debug, info};

use crate::backends::BackendAdapter;
use crate::error::{DispatchError, Result};

pub struct BackendRegistry {
    by_slug: HashMap<&'static str, Arc<dyn BackendAdapter>>,
    by_id: HashMap<u16, Arc<dyn BackendAdapter>>,
}

impl BackendRegistry {
    pub fn builder() -> BackendRegistryBuilder {
        BackendRegistryBuilder::default()
    }

    /// 按渠道 slug 查找后端
    pub fn get(&self, medium: &Medium) -> Result<Arc<dyn BackendAdapter>> {
        self.by_slug
            .get(medium.as_str())
            .cloned()
            .ok_or_else(|| DispatchError::UnknownBackend {
                medium: medium.to_string(),
            })
    }

    /// 按历史数字 id 查找后端
    pub fn get_by_id(&self, id: u16) -> Result<Arc<dyn BackendAdapter>> {
        self.by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownBackend {
                medium: id.to_string(),
            })
    }

    pub fn contains(&self, medium: &Medium) -> bool {
        self.by_slug.contains_key(medium.as_str())
    }

    /// 已注册的渠道 slug（按字母序）
    pub fn registered_slugs(&self) -> Vec<&'static str> {
        let mut slugs: Vec<_> = self.by_slug.keys().copied().collect();
        slugs.sort_unstable();
        slugs
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }
}

#[derive(Default)]
pub struct BackendRegistryBuilder {
    backends: Vec<Arc<dyn BackendAdapter>>,
}

impl BackendRegistryBuilder {
    /// 注册一个后端；同一 slug 或 id 重复注册视为配置错误
    pub fn register(mut self, backend: Arc<dyn BackendAdapter>) -> Result<Self> {
        if self
            .backends
            .iter()
            .any(|b| b.slug() == backend.slug() || b.id() == backend.id())
        {
            return Err(NoticeError::InvalidArgument {
                field: "backend".to_string(),
                message: format!("重复注册渠道后端: {}", backend.slug()),
            }
            .into());
        }

        debug!(
            id = backend.id(),
            slug = backend.slug(),
            title = backend.title(),
            "注册渠道后端"
        );
        self.backends.push(backend);
        Ok(self)
    }

    pub fn build(self) -> BackendRegistry {
        let mut by_slug = HashMap::new();
        let mut by_id = HashMap::new();
        for backend in self.backends {
            by_slug.insert(backend.slug(), backend.clone());
            by_id.insert(backend.id(), backend);
        }

        let registry = BackendRegistry { by_slug, by_id };
        info!(
            backend_count = registry.len(),
            slugs = ?registry.registered_slugs(),
            "渠道后端注册表初始化完成"
        );
        registry
    }
}
