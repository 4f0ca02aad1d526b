//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use std::net::SocketAddr;

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册投递管道相关指标的描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "notice_dispatch_total",
        "Total number of dispatch attempts by outcome"
    );
    metrics::describe_histogram!(
        "notice_dispatch_duration_seconds",
        "Dispatch attempt duration in seconds"
    );
    metrics::describe_counter!(
        "notice_deliveries_total",
        "Total number of backend deliveries by medium and status"
    );
    metrics::describe_counter!(
        "notice_retries_total",
        "Total number of scheduled retries by track"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次投递尝试
///
/// outcome: succeeded / retrying / failed
#[inline]
pub fn record_dispatch(outcome: &str, duration_secs: f64) {
    metrics::counter!("notice_dispatch_total", "outcome" => outcome.to_string()).increment(1);
    metrics::histogram!("notice_dispatch_duration_seconds", "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// 记录单个渠道的投递结果
///
/// status: sent / suppressed / failed
#[inline]
pub fn record_delivery(medium: &str, status: &str) {
    metrics::counter!(
        "notice_deliveries_total",
        "medium" => medium.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一次已安排的重试
#[inline]
pub fn record_retry(track: &str) {
    metrics::counter!("notice_retries_total", "track" => track.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 即使没有初始化 recorder，这些函数也不应该 panic
        record_dispatch("succeeded", 0.1);
        record_dispatch("retrying", 0.02);
        record_delivery("email", "sent");
        record_delivery("email", "suppressed");
        record_retry("resolution");
    }
}
