use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Response, Url};

use super::config::ConsulConfig;
use crate::services::registry::{
    BackendError, DiscoveryBackend, RegistryError, ServiceRegistration,
};

const TOKEN_HEADER: &str = "x-consul-token";

/// Consul agent HTTP API 客户端
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ConsulClient {
    pub fn new(config: ConsulConfig) -> Result<Self, RegistryError> {
        let base_url = config.base_url().map_err(RegistryError::BackendUnavailable)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(token).map_err(|e| {
                RegistryError::BackendUnavailable(format!("invalid consul token: {e}"))
            })?;
            value.set_sensitive(true);
            headers.insert(TOKEN_HEADER, value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| RegistryError::BackendUnavailable(e.to_string()))?;

        tracing::debug!(address = %base_url, "Consul client created");

        Ok(Self { http, base_url })
    }

    // 拼接 API 路径，各段自动做百分号编码
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BackendError::Rejected(format!("invalid base url: {}", self.base_url)))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    async fn check_status(response: Response) -> Result<(), BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

impl DiscoveryBackend for ConsulClient {
    async fn register_service(&self, registration: &ServiceRegistration) -> Result<(), BackendError> {
        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        let response = self.http.put(url).json(registration).send().await?;
        Self::check_status(response).await
    }

    async fn pass_ttl(&self, check_id: &str) -> Result<(), BackendError> {
        let url = self.endpoint(&["v1", "agent", "check", "pass", check_id])?;
        let response = self.http.put(url).send().await?;
        Self::check_status(response).await
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), BackendError> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id])?;
        let response = self.http.put(url).send().await?;
        Self::check_status(response).await
    }
}
