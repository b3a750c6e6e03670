use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    endpoint::{ExecutionContext, ServiceEndpoint},
    error::Result,
};

pub const DEFAULT_API_BASE: &str = "http://localhost:8080";

/// Root configuration, usually read from `engage.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngageConfig {
    pub api: ApiConfig,
    pub realtime: RealtimeConfig,
    pub session: SessionConfig,
}

impl EngageConfig {
    /// Resolve the service endpoint for an execution context.
    ///
    /// Server-side code talks to the internal address, interactive clients
    /// to the public one.
    pub fn endpoint(&self, context: ExecutionContext) -> Result<ServiceEndpoint> {
        let raw = match context {
            ExecutionContext::Server => &self.api.internal_base,
            ExecutionContext::Client => &self.api.public_base,
        };
        ServiceEndpoint::parse(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base address used from server-side contexts.
    pub internal_base: String,
    /// Base address used from interactive clients.
    pub public_base: String,
    /// Per-request timeout for REST calls. Streams are not subject to it.
    pub request_timeout_secs: u64,
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            internal_base: DEFAULT_API_BASE.into(),
            public_base: DEFAULT_API_BASE.into(),
            request_timeout_secs: 30,
        }
    }
}

/// Event channel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Keep-alive interval while the channel is open.
    pub ping_interval_secs: u64,
    /// Constant delay before each reconnection attempt.
    pub reconnect_delay_ms: u64,
    /// Reconnection budget; reset on every successful open.
    pub max_reconnect_attempts: u32,
    /// Bound on opening the socket, handshake included.
    pub connect_timeout_secs: u64,
}

impl RealtimeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Override for the persisted session file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Lifetime of a persisted credential (default: 3 days).
    pub ttl_secs: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_secs: 60 * 60 * 24 * 3,
        }
    }
}
