/// 注册器致命错误：只会出现在构造阶段或 `register` 的初次注册之前/之中
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid registry config: {0}")]
    InvalidConfig(String),
    #[error("Discovery backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Register service to discovery backend error: {0}")]
    RegistrationFailed(#[source] BackendError),
    #[error("Registry is already running")]
    AlreadyStarted,
    #[error("Registry task aborted: {0}")]
    TaskAborted(#[from] tokio::task::JoinError),
}

/// 单次后端调用失败。在注册循环内只记录日志，不向调用方传播
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Backend rejected request: {0}")]
    Rejected(String),
}
