//! RPC crate for the L2 node.
//!
//! Serves a read-only JSON-RPC 2.0 API over the chain store with jsonrpsee:
//! - HTTP, with host-header filtering (`vhosts`)
//! - WebSocket, with origin filtering (`origins`)
//!
//! Each transport merges only the namespaces enabled in its configuration.

pub mod api;
pub mod config;
pub mod server;

pub use api::{
    EthApiServer, NAMESPACES, NetApiServer, PersonalApiServer, RpcApi, SERVER_ERROR_CODE,
    Web3ApiServer,
};
pub use config::{HttpConfig, WsConfig};
pub use server::{RpcServerHandle, start_http, start_ws};
