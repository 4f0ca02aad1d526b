//! 通知投递调度
//!
//! 一次投递调用处理一条通知和一组有序的投递偏好：
//! 1. 解析关联对象；失败则本次尝试立即结束，不调用任何后端
//! 2. 构建基础上下文
//! 3. 按传入顺序逐个偏好查找后端并发送
//!
//! 偏好之间串行执行，不做并行扇出。未知渠道或后端上抛的错误会中止剩余偏好，
//! 由任务执行器决定是否整体重试。重试会从第 1 步重新执行整个调用，
//! 之前已成功的渠道会再次发送（至少一次语义）。

use std::sync::Arc;

use notice_shared::models::{DeliveryPreference, Notice};
use notice_shared::observability::metrics::record_delivery;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::context::DeliveryContext;
use crate::error::Result;
use crate::registry::BackendRegistry;
use crate::resolver::ContentResolver;

/// 单次投递调用的汇总
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    /// 产生了投递回执的偏好数
    pub delivered: usize,
    /// 后端按配置吞掉失败、未产生投递的偏好数
    pub suppressed: usize,
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: ContentResolver,
    registry: Arc<BackendRegistry>,
}

impl Dispatcher {
    pub fn new(resolver: ContentResolver, registry: Arc<BackendRegistry>) -> Self {
        Self { resolver, registry }
    }

    /// 对一条通知执行一次投递调用
    #[instrument(skip_all, fields(notice_id = %notice.id, preferences = preferences.len()))]
    pub async fn dispatch(
        &self,
        notice: &Notice,
        preferences: &[DeliveryPreference],
        extra_context: Option<&Map<String, Value>>,
    ) -> Result<DispatchSummary> {
        let related_object = self.resolver.resolve(notice).await?;
        let base = DeliveryContext::build(notice, related_object, extra_context);

        let mut summary = DispatchSummary::default();
        for preference in preferences {
            let backend = self.registry.get(&preference.medium)?;
            let context = base.for_preference(preference);

            debug!(
                preference_id = preference.id,
                medium = %preference.medium,
                "调用渠道后端"
            );

            match backend.send(notice, &context).await {
                Ok(Some(_)) => {
                    summary.delivered += 1;
                    record_delivery(backend.slug(), "sent");
                }
                Ok(None) => {
                    summary.suppressed += 1;
                    record_delivery(backend.slug(), "suppressed");
                }
                Err(e) => {
                    record_delivery(backend.slug(), "failed");
                    return Err(e);
                }
            }
        }

        info!(
            notice_id = %notice.id,
            delivered = summary.delivered,
            suppressed = summary.suppressed,
            "通知投递完成"
        );
        Ok(summary)
    }
}
