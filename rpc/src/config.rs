//! HTTP and WebSocket endpoint configuration.

use serde::{Deserialize, Serialize};

/// Default HTTP JSON-RPC port.
pub const DEFAULT_HTTP_PORT: u16 = 8547;
/// Default WebSocket JSON-RPC port.
pub const DEFAULT_WS_PORT: u16 = 8548;

/// Configuration of the HTTP JSON-RPC endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Interface to listen on. Empty disables the endpoint.
    pub addr: String,

    /// Port to listen on; 0 picks a free port.
    pub port: u16,

    /// API modules offered over HTTP.
    pub api: Vec<String>,

    /// Host names accepted in the `Host` header. `*` accepts any host.
    pub vhosts: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            port: DEFAULT_HTTP_PORT,
            api: default_api(),
            vhosts: vec!["localhost".to_string()],
        }
    }
}

impl HttpConfig {
    pub fn enabled(&self) -> bool {
        !self.addr.is_empty()
    }

    pub fn modules(&self) -> Vec<String> {
        self.api.clone()
    }
}

/// Configuration of the WebSocket JSON-RPC endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    /// Interface to listen on. Empty disables the endpoint.
    pub addr: String,

    /// Port to listen on; 0 picks a free port.
    pub port: u16,

    /// API modules offered over WebSocket.
    pub api: Vec<String>,

    /// Origins accepted on upgrade. Empty accepts any origin.
    pub origins: Vec<String>,

    /// Also offer the `personal` module.
    pub expose_all: bool,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            port: DEFAULT_WS_PORT,
            api: default_api(),
            origins: Vec::new(),
            expose_all: false,
        }
    }
}

impl WsConfig {
    pub fn enabled(&self) -> bool {
        !self.addr.is_empty()
    }

    pub fn modules(&self) -> Vec<String> {
        let mut modules = self.api.clone();
        if self.expose_all && !modules.iter().any(|module| module == "personal") {
            modules.push("personal".to_string());
        }
        modules
    }
}

fn default_api() -> Vec<String> {
    vec!["net".to_string(), "web3".to_string(), "eth".to_string()]
}
