//! 关联对象解析
//!
//! 根据通知上的 (content_type, object_id) 引用取回实时的领域对象。
//! 三种结果需要严格区分：
//! - 通知没有引用：直接得到 `None`，不访问存储
//! - 引用存在且对象可读：得到对象
//! - 引用存在但对象已不存在：`ResolutionFailed`，由执行器走短延迟重试

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use notice_shared::models::Notice;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};

use crate::error::{DispatchError, Result};

/// 对象存储接口
///
/// `Ok(None)` 是“对象不存在”的信号；`Err` 只表示存储本身出错。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object_for_type(&self, content_type: &str, object_id: &str)
    -> Result<Option<Value>>;
}

// ---------------------------------------------------------------------------
// ContentResolver
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ContentResolver {
    store: Arc<dyn ObjectStore>,
}

impl ContentResolver {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// 解析通知引用的关联对象
    #[instrument(skip_all, fields(notice_id = %notice.id))]
    pub async fn resolve(&self, notice: &Notice) -> Result<Option<Value>> {
        let Some(content) = &notice.content else {
            return Ok(None);
        };

        match self
            .store
            .get_object_for_type(&content.content_type, &content.object_id)
            .await?
        {
            Some(object) => {
                debug!(content = %content, "关联对象已解析");
                Ok(Some(object))
            }
            None => {
                warn!(content = %content, "关联对象不存在");
                Err(DispatchError::ResolutionFailed {
                    content_type: content.content_type.clone(),
                    object_id: content.object_id.clone(),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PgObjectStore — PostgreSQL 实现
// ---------------------------------------------------------------------------

/// 基于 PostgreSQL 的对象存储
///
/// 内容类型只能映射到白名单中的数据表，表名在构造时校验，
/// 查询时以 `to_jsonb(row)` 取回整行。
pub struct PgObjectStore {
    pool: PgPool,
    tables: HashMap<String, String>,
}

impl PgObjectStore {
    pub fn new(pool: PgPool, tables: HashMap<String, String>) -> Result<Self> {
        if let Some((content_type, table)) = tables.iter().find(|(_, t)| !is_valid_table_name(t))
        {
            return Err(DispatchError::Store(format!(
                "非法表名: content_type={content_type}, table={table}"
            )));
        }
        Ok(Self { pool, tables })
    }
}

/// 表名只允许字母、数字、下划线，以及一个可选的 schema 分隔点
fn is_valid_table_name(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        })
}

#[async_trait]
impl ObjectStore for PgObjectStore {
    async fn get_object_for_type(
        &self,
        content_type: &str,
        object_id: &str,
    ) -> Result<Option<Value>> {
        let table = self.tables.get(content_type).ok_or_else(|| {
            DispatchError::Store(format!("未配置的内容类型: {content_type}"))
        })?;

        let sql = format!("SELECT to_jsonb(t) FROM {table} t WHERE t.id::text = $1");
        let object = sqlx::query_scalar::<_, Value>(&sql)
            .bind(object_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(notice_shared::error::NoticeError::from)?;

        Ok(object)
    }
}

// ---------------------------------------------------------------------------
// InMemoryObjectStore — 内存实现
// ---------------------------------------------------------------------------

/// 内存对象存储，用于本地运行与测试
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<(String, String), Value>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content_type: &str, object_id: &str, object: Value) {
        self.objects
            .insert((content_type.to_string(), object_id.to_string()), object);
    }

    pub fn remove(&self, content_type: &str, object_id: &str) -> Option<Value> {
        self.objects
            .remove(&(content_type.to_string(), object_id.to_string()))
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_object_for_type(
        &self,
        content_type: &str,
        object_id: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .objects
            .get(&(content_type.to_string(), object_id.to_string()))
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use notice_shared::models::{ContentRef, NoticeType, Party};

    fn notice_with(content: Option<ContentRef>) -> Notice {
        Notice {
            id: "notice-001".to_string(),
            notice_type: NoticeType {
                label: "comment_reply".to_string(),
                display: "Comment reply".to_string(),
                description: String::new(),
                template_slug: "comment_reply".to_string(),
                allowed: true,
            },
            recipient: Party {
                id: "user-001".to_string(),
                email: Some("alice@example.com".to_string()),
                display_name: "Alice".to_string(),
            },
            sender: None,
            content,
            created_at: Utc::now(),
        }
    }

    fn comment_ref() -> Option<ContentRef> {
        Some(ContentRef {
            content_type: "comment".to_string(),
            object_id: "42".to_string(),
        })
    }

    #[tokio::test]
    async fn test_no_reference_skips_store() {
        let mut store = MockObjectStore::new();
        store.expect_get_object_for_type().never();

        let resolver = ContentResolver::new(Arc::new(store));
        let resolved = resolver.resolve(&notice_with(None)).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_existing_object_is_returned() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_object_for_type()
            .withf(|content_type, object_id| content_type == "comment" && object_id == "42")
            .times(1)
            .returning(|_, _| Ok(Some(serde_json::json!({"id": 42, "body": "hi"}))));

        let resolver = ContentResolver::new(Arc::new(store));
        let resolved = resolver.resolve(&notice_with(comment_ref())).await.unwrap();
        assert_eq!(resolved, Some(serde_json::json!({"id": 42, "body": "hi"})));
    }

    #[tokio::test]
    async fn test_dangling_reference_is_resolution_failure() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_object_for_type()
            .times(1)
            .returning(|_, _| Ok(None));

        let resolver = ContentResolver::new(Arc::new(store));
        let err = resolver
            .resolve(&notice_with(comment_ref()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ResolutionFailed { ref content_type, ref object_id }
                if content_type == "comment" && object_id == "42"
        ));
    }

    #[tokio::test]
    async fn test_store_error_is_not_resolution_failure() {
        let mut store = MockObjectStore::new();
        store
            .expect_get_object_for_type()
            .returning(|_, _| Err(DispatchError::Store("连接超时".to_string())));

        let resolver = ContentResolver::new(Arc::new(store));
        let err = resolver
            .resolve(&notice_with(comment_ref()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Store(_)));
    }

    #[test]
    fn test_in_memory_store_insert_and_remove() {
        let store = InMemoryObjectStore::new();
        store.insert("comment", "42", serde_json::json!({"id": 42}));

        let found = tokio_test::block_on(store.get_object_for_type("comment", "42"));
        assert!(tokio_test::assert_ok!(found).is_some());

        store.remove("comment", "42");
        let gone = tokio_test::block_on(store.get_object_for_type("comment", "42"));
        assert!(tokio_test::assert_ok!(gone).is_none());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("comments"));
        assert!(is_valid_table_name("forum.posts"));
        assert!(!is_valid_table_name("posts; DROP TABLE users"));
        assert!(!is_valid_table_name("a.b.c"));
        assert!(!is_valid_table_name("1posts"));
        assert!(!is_valid_table_name(""));
    }
}
