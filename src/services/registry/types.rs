use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::services::consul::ConsulConfig;

// 健康检查 key 前缀，与 Consul 为单检查服务自动分配的 CheckID 一致
pub const CHECK_ID_PREFIX: &str = "service:";

// 后端在健康检查持续 critical 后自动注销实例的宽限期
pub const DEREGISTER_CRITICAL_AFTER: &str = "1m";

// 全量重新注册的周期
pub const REREGISTER_INTERVAL: Duration = Duration::from_secs(60);

/// 被注册实例的身份与网络位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub id: String,
    pub address: String,
    pub port: u16,
    /// 对注册器不透明，序列化后作为 tag 附加
    pub metadata: BTreeMap<String, String>,
}

/// 单个注册器实例的配置
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub backend: ConsulConfig,
    pub service_name: String,
    pub node: NodeData,
    pub ttl_seconds: u64,
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// 注册时写入的 TTL 健康检查描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthCheck {
    #[serde(rename = "TTL")]
    pub ttl: String,
    pub status: HealthStatus,
    pub deregister_critical_service_after: String,
}

impl HealthCheck {
    pub fn passing_ttl(ttl_seconds: u64) -> Self {
        Self {
            ttl: format!("{ttl_seconds}s"),
            status: HealthStatus::Passing,
            deregister_critical_service_after: DEREGISTER_CRITICAL_AFTER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
}

/// 提交给发现后端的完整注册载荷，初次注册与周期性重注册共用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
    pub check: HealthCheck,
}

/// 注册器生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Unregistered,
    Registering,
    Registered,
    Deregistering,
    Deregistered,
    Failed,
}

// 注册循环统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub keepalives_sent: u64,
    pub keepalive_failures: u64,
    pub reregistrations: u64,
    pub reregistration_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub keepalives_sent: AtomicU64,
    pub keepalive_failures: AtomicU64,
    pub reregistrations: AtomicU64,
    pub reregistration_failures: AtomicU64,
}

impl StatsCounters {
    pub fn snapshot(&self) -> RegistryStats {
        RegistryStats {
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            keepalive_failures: self.keepalive_failures.load(Ordering::Relaxed),
            reregistrations: self.reregistrations.load(Ordering::Relaxed),
            reregistration_failures: self.reregistration_failures.load(Ordering::Relaxed),
        }
    }
}
