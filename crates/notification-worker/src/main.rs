//! 通知投递工作者
//!
//! 消费 `notice.dispatch` 上的投递任务，按用户偏好逐个渠道发送通知。

use std::sync::Arc;

use anyhow::Result;
use notice_shared::{
    config::AppConfig,
    database::Database,
    dlq::DlqProducer,
    kafka::KafkaProducer,
    observability,
    retry::RetryPolicy,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use notification_worker::{
    backends::{EmailBackend, EmailBackendConfig},
    consumer::DispatchConsumer,
    dispatcher::Dispatcher,
    registry::BackendRegistry,
    resolver::{ContentResolver, InMemoryObjectStore, ObjectStore, PgObjectStore},
    runner::{KafkaDeadLetterSink, RetryPolicies, TaskRunner},
    transport::{HttpMailTransport, LogMailTransport, RecipientTransport, TemplateCatalog},
};

const SERVICE_NAME: &str = "notification-worker";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载并校验配置
    let config = AppConfig::load(SERVICE_NAME)?;
    config.validate()?;

    // 2. 可观测性
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting {}...", SERVICE_NAME);
    info!(
        environment = %config.environment,
        debug = config.notification.debug,
        fail_silently = config.notification.fail_silently,
        "Configuration loaded"
    );
    if config.is_production() && config.notification.debug {
        warn!("Debug mode enabled in production, missing templates will be raised as errors");
    }

    // 3. 收件人传输
    let catalog = match config
        .notification
        .resolve_template_dir(&AppConfig::config_dir())
    {
        Some(dir) => {
            info!(template_dir = %dir.display(), "Loading email templates");
            TemplateCatalog::load_dir(&dir)?
        }
        None => TemplateCatalog::default(),
    };
    let transport: Arc<dyn RecipientTransport> = match &config.notification.mail_relay_url {
        Some(url) => {
            info!(relay = %url, "Using HTTP mail relay");
            Arc::new(HttpMailTransport::new(url, &config.notification.from_address)?)
        }
        None => {
            warn!("No mail relay configured, emails will only be logged");
            Arc::new(LogMailTransport::new(catalog))
        }
    };

    // 4. 渠道后端注册表（启动后不可变）
    let registry = BackendRegistry::builder()
        .register(Arc::new(EmailBackend::new(
            transport,
            EmailBackendConfig::from(&config.notification),
        )))?
        .build();

    // 5. 对象存储
    let (store, db): (Arc<dyn ObjectStore>, Option<Database>) = if config.content.tables.is_empty() {
        warn!("No content tables configured, using in-memory object store");
        (Arc::new(InMemoryObjectStore::new()), None)
    } else {
        let db = Database::connect(&config.database).await?;
        db.health_check().await?;
        info!("Database connection established");
        let store = PgObjectStore::new(db.pool().clone(), config.content.tables.clone())?;
        (Arc::new(store), Some(db))
    };

    // 6. 任务执行器，永久失败写入死信队列
    let producer = KafkaProducer::new(&config.kafka)?;
    let dlq = DlqProducer::new(producer, SERVICE_NAME, RetryPolicy::default());
    let dispatcher = Dispatcher::new(ContentResolver::new(store), Arc::new(registry));
    let runner = Arc::new(
        TaskRunner::new(
            dispatcher,
            RetryPolicies::from_config(&config.retry),
            Arc::new(KafkaDeadLetterSink::new(dlq)),
            config.worker.concurrency,
        )
        .with_max_in_flight(config.worker.max_in_flight),
    );
    info!(
        concurrency = config.worker.concurrency,
        max_in_flight = config.worker.max_in_flight,
        "Task runner initialized"
    );

    // 7. 启动消费者
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = DispatchConsumer::new(&config, runner)?;
    let consumer_task = consumer.run(shutdown_rx);
    tokio::pin!(consumer_task);

    let result = tokio::select! {
        result = &mut consumer_task => {
            warn!("Dispatch consumer stopped before shutdown signal");
            result
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            consumer_task.await
        }
    };
    if let Err(e) = result {
        error!(error = %e, "Dispatch consumer exited with error");
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
