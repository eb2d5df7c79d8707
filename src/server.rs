use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::registry::{DiscoveryBackend, RegistryError, ServiceRegistry};

pub async fn start() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;

    tracing::info!(
        consul = %config.consul.address,
        service_name = %config.service.name,
        node_id = %config.service.node.id,
        "Configuration loaded"
    );

    // 初始化服务注册器
    let registry = Arc::new(ServiceRegistry::new(config.registry_config())?);

    run(registry, shutdown_signal()).await?;
    Ok(())
}

/// 运行注册循环，直到 `shutdown` 完成或初次注册失败
pub async fn run<B, F>(registry: Arc<ServiceRegistry<B>>, shutdown: F) -> Result<(), RegistryError>
where
    B: DiscoveryBackend,
    F: std::future::Future<Output = ()>,
{
    let registry_task = registry.clone();
    let mut registration = tokio::spawn(async move { registry_task.register().await });

    tokio::select! {
        // 注册循环先于关闭信号退出，只可能是初次注册失败
        result = &mut registration => {
            return flatten(result);
        }
        _ = shutdown => {
            tracing::info!("Shutdown signal received");
        }
    }

    registry.deregister();

    let result = flatten(registration.await);
    tracing::info!(state = ?registry.state(), "Registry stopped");
    result
}

fn flatten(
    result: Result<Result<(), RegistryError>, tokio::task::JoinError>,
) -> Result<(), RegistryError> {
    result.map_err(|e| {
        tracing::error!(error = %e, "Registry task aborted");
        RegistryError::from(e)
    })?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
