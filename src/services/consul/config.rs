use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consul 客户端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// Consul agent 地址，缺省 scheme 时按 http 处理
    pub address: String,
    /// ACL token
    pub token: Option<String>,
    /// 单次请求超时（秒），0 表示不限制
    pub request_timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            request_timeout_secs: 10,
        }
    }
}

impl ConsulConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn base_url(&self) -> Result<Url, String> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err("consul address is empty".to_string());
        }

        let raw = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let url = Url::parse(&raw)
            .map_err(|e| format!("invalid consul address `{}`: {e}", self.address))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported consul scheme `{other}`")),
        }
        if url.host_str().is_none() {
            return Err(format!("consul address `{}` has no host", self.address));
        }

        Ok(url)
    }
}
