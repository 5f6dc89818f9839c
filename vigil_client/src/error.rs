use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint url {url:?}: {source}")]
    Endpoint {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("endpoint must use ws:// or wss://, got {0:?}")]
    Scheme(String),
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("log capacity must be at least 1")]
    ZeroLogCapacity,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("threshold must be a finite number, got {0}")]
    InvalidThreshold(f32),
    #[error("unrecognised control input: {0:?}")]
    UnknownInput(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("transport task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("feed listener has no local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    #[error("feed send failed: {0}")]
    Send(String),
}
