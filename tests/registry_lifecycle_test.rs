use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use grpclb_registry::server;
use grpclb_registry::services::consul::ConsulConfig;
use grpclb_registry::services::registry::{
    BackendError, DiscoveryBackend, NodeData, RegistryConfig, RegistryError, RegistryState,
    ServiceRegistration, ServiceRegistry,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Register(ServiceRegistration),
    Pass(String),
    Deregister(String),
}

// 记录所有调用的内存后端，可注入失败
#[derive(Debug, Default)]
struct RecordingBackend {
    calls: Mutex<Vec<Call>>,
    fail_initial_register: AtomicBool,
    fail_reregister: AtomicBool,
    fail_deregister: AtomicBool,
    failing_passes: AtomicUsize,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn register_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Register(_)))
            .count()
    }

    fn pass_checks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Pass(check_id) => Some(check_id),
                _ => None,
            })
            .collect()
    }

    fn deregistered_ids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Deregister(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl DiscoveryBackend for RecordingBackend {
    async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), BackendError> {
        let is_initial = self.register_count() == 0;
        self.calls
            .lock()
            .unwrap()
            .push(Call::Register(registration.clone()));

        let fail = if is_initial {
            self.fail_initial_register.load(Ordering::SeqCst)
        } else {
            self.fail_reregister.load(Ordering::SeqCst)
        };
        if fail {
            return Err(BackendError::Rejected("register rejected".to_string()));
        }
        Ok(())
    }

    async fn pass_ttl(&self, check_id: &str) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Pass(check_id.to_string()));

        let remaining = self.failing_passes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_passes.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Status {
                status: 500,
                body: "agent unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Deregister(service_id.to_string()));

        if self.fail_deregister.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected("deregister rejected".to_string()));
        }
        Ok(())
    }
}

fn registry_config(ttl_seconds: u64) -> RegistryConfig {
    RegistryConfig {
        backend: ConsulConfig::default(),
        service_name: "test".to_string(),
        node: NodeData {
            id: "svc-1".to_string(),
            address: "127.0.0.1".to_string(),
            port: 50051,
            metadata: BTreeMap::from([("zone".to_string(), "a".to_string())]),
        },
        ttl_seconds,
    }
}

fn new_registry(backend: RecordingBackend) -> Arc<ServiceRegistry<RecordingBackend>> {
    Arc::new(ServiceRegistry::with_backend(registry_config(9), backend).expect("valid config"))
}

async fn wait_for_state(registry: &ServiceRegistry<RecordingBackend>, state: RegistryState) {
    let mut rx = registry.subscribe_state();
    rx.wait_for(|s| *s == state)
        .await
        .expect("state channel closed");
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_keepalive_then_deregister() {
    let registry = new_registry(RecordingBackend::default());

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });

    tokio::time::sleep(Duration::from_secs(10)).await;

    let backend = registry.backend();
    assert!(backend.pass_checks().len() >= 3);
    // 只有初次注册，重注册周期为一分钟
    assert_eq!(backend.register_count(), 1);
    assert_eq!(registry.state(), RegistryState::Registered);

    registry.deregister();
    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("register did not return after deregister")
        .expect("register task panicked");

    assert!(result.is_ok());
    assert_eq!(backend.deregistered_ids(), vec!["svc-1".to_string()]);
    assert_eq!(registry.state(), RegistryState::Deregistered);
}

#[tokio::test(start_paused = true)]
async fn test_initial_registration_payload() {
    let registry = new_registry(RecordingBackend::default());

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });
    wait_for_state(&registry, RegistryState::Registered).await;

    let calls = registry.backend().calls();
    let Some(Call::Register(registration)) = calls.first() else {
        panic!("first call should be a registration, got {calls:?}");
    };
    assert_eq!(registration.id, "svc-1");
    assert_eq!(registration.name, "test");
    assert_eq!(registration.address, "127.0.0.1");
    assert_eq!(registration.port, 50051);
    assert_eq!(registration.tags, vec![r#"{"zone":"a"}"#.to_string()]);
    assert_eq!(registration.check.ttl, "9s");
    assert_eq!(registration.check.deregister_critical_service_after, "1m");

    registry.deregister();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_interval_and_check_key() {
    let registry = new_registry(RecordingBackend::default());
    assert_eq!(registry.keepalive_interval(), Duration::from_secs(3));

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });

    // 第一次保活在一个完整周期之后
    tokio::time::sleep(Duration::from_millis(2900)).await;
    assert!(registry.backend().pass_checks().is_empty());

    tokio::time::sleep(Duration::from_millis(3200)).await;
    let checks = registry.backend().pass_checks();
    assert_eq!(checks.len(), 2);
    assert!(checks.iter().all(|c| c == "service:svc-1"));
    assert_eq!(registry.stats().keepalives_sent, 2);

    registry.deregister();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_initial_registration_failure_is_fatal() {
    let backend = RecordingBackend::default();
    backend.fail_initial_register.store(true, Ordering::SeqCst);
    let registry = new_registry(backend);

    let result = registry.register().await;
    assert!(matches!(result, Err(RegistryError::RegistrationFailed(_))));
    assert_eq!(registry.state(), RegistryState::Failed);

    // 不会进入循环
    tokio::time::sleep(Duration::from_secs(120)).await;
    let backend = registry.backend();
    assert_eq!(backend.register_count(), 1);
    assert!(backend.pass_checks().is_empty());
    assert!(backend.deregistered_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_double_deregister_issues_single_call() {
    let registry = new_registry(RecordingBackend::default());

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });
    wait_for_state(&registry, RegistryState::Registered).await;

    registry.deregister();
    registry.deregister();
    handle.await.unwrap().unwrap();
    registry.deregister();

    assert_eq!(registry.backend().deregistered_ids(), vec!["svc-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_failure_does_not_stop_loop() {
    let backend = RecordingBackend::default();
    backend.failing_passes.store(1, Ordering::SeqCst);
    let registry = new_registry(backend);

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });

    tokio::time::sleep(Duration::from_secs(61)).await;

    let backend = registry.backend();
    // 3s..60s 共 20 次保活，第一次失败
    assert_eq!(backend.pass_checks().len(), 20);
    assert_eq!(backend.register_count(), 2);
    assert_eq!(registry.state(), RegistryState::Registered);

    let stats = registry.stats();
    assert_eq!(stats.keepalive_failures, 1);
    assert_eq!(stats.keepalives_sent, 19);
    assert_eq!(stats.reregistrations, 1);

    registry.deregister();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_reregistration_failure_does_not_stop_loop() {
    let backend = RecordingBackend::default();
    backend.fail_reregister.store(true, Ordering::SeqCst);
    let registry = new_registry(backend);

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(registry.backend().register_count(), 2);
    assert_eq!(registry.stats().reregistration_failures, 1);
    let passes_before = registry.backend().pass_checks().len();

    // 下一次保活在 63s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(registry.backend().pass_checks().len(), passes_before + 1);
    assert_eq!(registry.state(), RegistryState::Registered);

    registry.deregister();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_deregister_failure_still_returns_ok() {
    let backend = RecordingBackend::default();
    backend.fail_deregister.store(true, Ordering::SeqCst);
    let registry = new_registry(backend);

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });
    wait_for_state(&registry, RegistryState::Registered).await;

    registry.deregister();
    assert!(handle.await.unwrap().is_ok());
    assert_eq!(registry.backend().deregistered_ids().len(), 1);
    assert_eq!(registry.state(), RegistryState::Deregistered);
}

#[tokio::test(start_paused = true)]
async fn test_no_calls_after_deregistration() {
    let registry = new_registry(RecordingBackend::default());

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });
    tokio::time::sleep(Duration::from_secs(4)).await;

    registry.deregister();
    handle.await.unwrap().unwrap();
    let calls_at_shutdown = registry.backend().calls();
    assert_eq!(calls_at_shutdown.last(), Some(&Call::Deregister("svc-1".to_string())));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(registry.backend().calls(), calls_at_shutdown);
}

#[tokio::test(start_paused = true)]
async fn test_deregister_before_register() {
    let registry = new_registry(RecordingBackend::default());
    registry.deregister();

    registry.register().await.unwrap();

    let calls = registry.backend().calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], Call::Register(_)));
    assert_eq!(calls[1], Call::Deregister("svc-1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_second_register_rejected() {
    let registry = new_registry(RecordingBackend::default());

    let task_registry = registry.clone();
    let handle = tokio::spawn(async move { task_registry.register().await });
    wait_for_state(&registry, RegistryState::Registered).await;

    let second = registry.register().await;
    assert!(matches!(second, Err(RegistryError::AlreadyStarted)));
    assert_eq!(registry.backend().register_count(), 1);

    registry.deregister();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_deregisters_on_shutdown() {
    let registry = new_registry(RecordingBackend::default());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let run_registry = registry.clone();
    let handle = tokio::spawn(async move {
        server::run(run_registry, async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    tokio::time::sleep(Duration::from_secs(7)).await;
    shutdown_tx.send(()).unwrap();

    assert!(handle.await.unwrap().is_ok());
    assert_eq!(registry.backend().pass_checks().len(), 2);
    assert_eq!(registry.backend().deregistered_ids(), vec!["svc-1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_initial_failure() {
    let backend = RecordingBackend::default();
    backend.fail_initial_register.store(true, Ordering::SeqCst);
    let registry = new_registry(backend);

    let result = server::run(registry.clone(), std::future::pending::<()>()).await;
    assert!(matches!(result, Err(RegistryError::RegistrationFailed(_))));
    assert!(registry.backend().deregistered_ids().is_empty());
}
