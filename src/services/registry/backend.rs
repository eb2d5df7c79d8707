use std::future::Future;

use super::error::BackendError;
use super::types::ServiceRegistration;

/// 注册器所需的发现后端能力集
pub trait DiscoveryBackend: Send + Sync + 'static {
    /// 幂等地注册（或覆盖）一个服务实例
    fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// 将 TTL 健康检查标记为 passing
    fn pass_ttl(&self, check_id: &str) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn deregister_service(
        &self,
        service_id: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}
