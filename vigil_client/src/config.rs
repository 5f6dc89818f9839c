use crate::error::ConfigError;
use crate::reconnect::ReconnectPolicy;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HOST: &str = "127.0.0.1:8000";
pub const WS_PATH: &str = "/ws";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_LOG_CAPACITY: usize = 50;
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub reconnect: ReconnectPolicy,
    pub log_capacity: usize,
    /// Outbound commands beyond this many in flight are dropped.
    pub command_buffer: usize,
}

/// Command-line overrides, highest priority.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Host (and port) serving the `/ws` endpoint.
    #[arg(long, conflicts_with = "ws_url")]
    pub host: Option<String>,

    /// Full websocket url, e.g. ws://10.0.0.4:8000/ws
    #[arg(long)]
    pub ws_url: Option<String>,

    #[arg(long)]
    pub reconnect_ms: Option<u64>,

    /// Give up after this many consecutive reconnect attempts (default: never).
    #[arg(long)]
    pub max_reconnects: Option<u32>,

    #[arg(long)]
    pub log_capacity: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: endpoint_for_host(DEFAULT_HOST).expect("default endpoint is a valid url"),
            reconnect: ReconnectPolicy::fixed(DEFAULT_RECONNECT_DELAY),
            log_capacity: DEFAULT_LOG_CAPACITY,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn for_endpoint(endpoint: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            ..Self::default()
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = non_empty(lookup("VIGIL_WS_URL")) {
            config.endpoint = parse_endpoint(&url)?;
        } else if let Some(host) = non_empty(lookup("VIGIL_HOST")) {
            config.endpoint = endpoint_for_host(&host)?;
        }
        if let Some(ms) = non_empty(lookup("VIGIL_RECONNECT_MS")) {
            config.reconnect.delay = Duration::from_millis(parse_num("VIGIL_RECONNECT_MS", &ms)?);
        }
        if let Some(max) = non_empty(lookup("VIGIL_MAX_RECONNECTS")) {
            config.reconnect.max_attempts = Some(parse_num("VIGIL_MAX_RECONNECTS", &max)?);
        }
        if let Some(cap) = non_empty(lookup("VIGIL_LOG_CAPACITY")) {
            config.log_capacity = parse_num("VIGIL_LOG_CAPACITY", &cap)?;
        }

        config.validate()
    }

    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        if let Some(url) = overrides.ws_url.as_deref() {
            self.endpoint = parse_endpoint(url)?;
        } else if let Some(host) = overrides.host.as_deref() {
            self.endpoint = endpoint_for_host(host)?;
        }
        if let Some(ms) = overrides.reconnect_ms {
            self.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(max) = overrides.max_reconnects {
            self.reconnect.max_attempts = Some(max);
        }
        if let Some(cap) = overrides.log_capacity {
            self.log_capacity = cap;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.log_capacity == 0 {
            return Err(ConfigError::ZeroLogCapacity);
        }
        Ok(self)
    }
}

pub fn endpoint_for_host(host: &str) -> Result<Url, ConfigError> {
    parse_endpoint(&format!("ws://{}{WS_PATH}", host.trim().trim_end_matches('/')))
}

fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::Endpoint {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::Scheme(other.to_string())),
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
