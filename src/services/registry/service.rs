use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use super::backend::DiscoveryBackend;
use super::error::{BackendError, RegistryError};
use super::types::{
    CHECK_ID_PREFIX, HealthCheck, REREGISTER_INTERVAL, RegistryConfig, RegistryState,
    RegistryStats, ServiceRegistration, StatsCounters,
};
use crate::services::consul::ConsulClient;

/// 单个服务实例在发现后端中的注册、保活与注销
///
/// `register` 阻塞运行直到 `deregister` 被调用；通常放在独立任务里与服务主逻辑并行，
/// 由关闭处理器调用 `deregister`。同一实例只允许一个 `register` 在运行。
#[derive(Debug)]
pub struct ServiceRegistry<B = ConsulClient> {
    backend: B,
    config: RegistryConfig,
    check_id: String,
    cancel_token: CancellationToken,
    started: AtomicBool,
    state_tx: watch::Sender<RegistryState>,
    stats: StatsCounters,
}

impl ServiceRegistry<ConsulClient> {
    /// 使用 `config.backend` 建立 Consul 客户端
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        // 先校验配置，再建立客户端：配置错误优先于地址错误报告
        Self::validate(&config)?;
        let backend = ConsulClient::new(config.backend.clone())?;
        Ok(Self::build(config, backend))
    }
}

impl<B: DiscoveryBackend> ServiceRegistry<B> {
    pub fn with_backend(config: RegistryConfig, backend: B) -> Result<Self, RegistryError> {
        Self::validate(&config)?;
        Ok(Self::build(config, backend))
    }

    fn build(config: RegistryConfig, backend: B) -> Self {
        let check_id = format!("{CHECK_ID_PREFIX}{}", config.node.id);
        let (state_tx, _) = watch::channel(RegistryState::Unregistered);

        Self {
            backend,
            config,
            check_id,
            cancel_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            state_tx,
            stats: StatsCounters::default(),
        }
    }

    fn validate(config: &RegistryConfig) -> Result<(), RegistryError> {
        if config.ttl_seconds == 0 {
            return Err(RegistryError::InvalidConfig(
                "ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if config.service_name.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "service_name must not be empty".to_string(),
            ));
        }
        if config.node.id.is_empty() {
            return Err(RegistryError::InvalidConfig(
                "node id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.config.ttl() / 3
    }

    pub fn state(&self) -> RegistryState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RegistryState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.snapshot()
    }

    fn set_state(&self, state: RegistryState) {
        tracing::debug!(
            service_id = %self.config.node.id,
            state = ?state,
            "Registry state changed"
        );
        self.state_tx.send_replace(state);
    }

    /// 初次注册后进入保活循环，直到收到取消信号
    ///
    /// 只有初次注册失败（或元数据无法序列化）会返回错误；
    /// 保活、重注册和注销失败都只记录日志。
    pub async fn register(&self) -> Result<(), RegistryError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::AlreadyStarted);
        }

        self.set_state(RegistryState::Registering);

        let registration = match self.build_registration() {
            Ok(registration) => registration,
            Err(e) => {
                tracing::error!(
                    service_id = %self.config.node.id,
                    error = %e,
                    "Failed to serialize node metadata"
                );
                self.set_state(RegistryState::Failed);
                return Err(e);
            }
        };

        if let Err(e) = self.backend.register_service(&registration).await {
            tracing::error!(
                service_id = %registration.id,
                service_name = %registration.name,
                error = %e,
                "Initial service registration failed"
            );
            self.set_state(RegistryState::Failed);
            return Err(RegistryError::RegistrationFailed(e));
        }

        tracing::info!(
            service_id = %registration.id,
            service_name = %registration.name,
            address = %registration.address,
            port = registration.port,
            ttl = %registration.check.ttl,
            "Service registered"
        );
        self.set_state(RegistryState::Registered);

        self.run_keepalive_loop(&registration).await;
        Ok(())
    }

    /// 请求注销。非阻塞、幂等；实际的后端注销由注册循环完成
    pub fn deregister(&self) {
        if !self.cancel_token.is_cancelled() {
            tracing::info!(service_id = %self.config.node.id, "Deregistration requested");
        }
        self.cancel_token.cancel();
    }

    fn build_registration(&self) -> Result<ServiceRegistration, RegistryError> {
        let node = &self.config.node;
        let metadata = serde_json::to_string(&node.metadata)?;

        Ok(ServiceRegistration {
            id: node.id.clone(),
            name: self.config.service_name.clone(),
            tags: vec![metadata],
            address: node.address.clone(),
            port: node.port,
            check: HealthCheck::passing_ttl(self.config.ttl_seconds),
        })
    }

    async fn run_keepalive_loop(&self, registration: &ServiceRegistration) {
        let keepalive_period = self.keepalive_interval();
        // 两个定时器都在一个完整周期之后才首次触发
        let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reregister = interval_at(Instant::now() + REREGISTER_INTERVAL, REREGISTER_INTERVAL);
        reregister.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // 同时就绪时取消优先
                biased;

                _ = self.cancel_token.cancelled() => break,

                _ = keepalive.tick() => {
                    if let Err(e) = self.keepalive().await {
                        self.stats.keepalive_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            check_id = %self.check_id,
                            error = %e,
                            "TTL check pass failed"
                        );
                    }
                }

                _ = reregister.tick() => {
                    if let Err(e) = self.reregister(registration).await {
                        self.stats.reregistration_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            service_id = %registration.id,
                            error = %e,
                            "Periodic service re-registration failed"
                        );
                    }
                }
            }
        }

        // 停止定时器后再注销
        drop(keepalive);
        drop(reregister);
        self.set_state(RegistryState::Deregistering);
        tracing::info!(service_id = %registration.id, "Cancellation observed, deregistering service");

        match self.backend.deregister_service(&registration.id).await {
            Ok(()) => {
                tracing::info!(service_id = %registration.id, "Service deregistered");
            }
            Err(e) => {
                tracing::warn!(
                    service_id = %registration.id,
                    error = %e,
                    "Service deregistration failed, relying on backend critical timeout"
                );
            }
        }

        self.set_state(RegistryState::Deregistered);
    }

    async fn keepalive(&self) -> Result<(), BackendError> {
        self.backend.pass_ttl(&self.check_id).await?;
        self.stats.keepalives_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(check_id = %self.check_id, "TTL check passed");
        Ok(())
    }

    async fn reregister(&self, registration: &ServiceRegistration) -> Result<(), BackendError> {
        self.backend.register_service(registration).await?;
        self.stats.reregistrations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(service_id = %registration.id, "Service re-registered");
        Ok(())
    }
}
