use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::services::consul::ConsulConfig;
use crate::services::registry::{NodeData, RegistryConfig};

pub const ENV_PREFIX: &str = "GRPCLB_";
pub const CONFIG_PATH_ENV: &str = "GRPCLB_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read environment overrides: {0}")]
    Env(#[from] envy::Error),
    #[error("failed to load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub consul: ConsulConfig,
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub ttl_seconds: u64,
    pub node: NodeConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "test".to_string(),
            ttl_seconds: 9,
            node: NodeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 为空时启动时生成 `<service>-<uuid>`
    pub id: String,
    pub address: String,
    pub port: u16,
    pub metadata: BTreeMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            address: "127.0.0.1".to_string(),
            port: 50051,
            metadata: BTreeMap::new(),
        }
    }
}

// 环境变量覆盖项，键名去掉 GRPCLB_ 前缀后小写
#[derive(Debug, Deserialize)]
struct EnvOverrides {
    consul_address: Option<String>,
    consul_token: Option<String>,
    service_name: Option<String>,
    node_id: Option<String>,
    node_address: Option<String>,
    node_port: Option<u16>,
    ttl_seconds: Option<u64>,
}

impl AppConfig {
    /// 依次加载 .env、配置文件和环境变量覆盖项
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(dotenvy::Error::Io(err)) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(&path)?;

        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        config.apply_overrides(overrides);
        config.finalize()?;
        Ok(config)
    }

    /// 配置文件不存在时返回默认配置
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(config_str) => Self::from_toml(&config_str),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn apply_env_iter<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        self.apply_overrides(overrides);
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: EnvOverrides) {
        if let Some(address) = overrides.consul_address {
            self.consul.address = address;
        }
        if let Some(token) = overrides.consul_token {
            self.consul.token = Some(token);
        }
        if let Some(name) = overrides.service_name {
            self.service.name = name;
        }
        if let Some(id) = overrides.node_id {
            self.service.node.id = id;
        }
        if let Some(address) = overrides.node_address {
            self.service.node.address = address;
        }
        if let Some(port) = overrides.node_port {
            self.service.node.port = port;
        }
        if let Some(ttl) = overrides.ttl_seconds {
            self.service.ttl_seconds = ttl;
        }
    }

    /// 校验并补全节点 ID
    pub fn finalize(&mut self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service.name must not be empty".to_string()));
        }
        if self.service.ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "service.ttl_seconds must be greater than zero".to_string(),
            ));
        }
        if self.service.node.port == 0 {
            return Err(ConfigError::Invalid("service.node.port must not be zero".to_string()));
        }
        if self.service.node.id.trim().is_empty() {
            self.service.node.id = format!("{}-{}", self.service.name, Uuid::new_v4());
            tracing::info!(node_id = %self.service.node.id, "Generated node id");
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        let node = &self.service.node;
        RegistryConfig {
            backend: self.consul.clone(),
            service_name: self.service.name.clone(),
            node: NodeData {
                id: node.id.clone(),
                address: node.address.clone(),
                port: node.port,
                metadata: node.metadata.clone(),
            },
            ttl_seconds: self.service.ttl_seconds,
        }
    }
}
