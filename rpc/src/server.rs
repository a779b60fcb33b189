//! jsonrpsee servers for the HTTP and WebSocket transports.
//!
//! Both servers run on the caller's tokio runtime. HTTP requests are checked
//! against `http.vhosts`, WebSocket upgrades against `ws.origins`. Each stops
//! through a [`RpcServerHandle`], which waits for the server to drain.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use jsonrpsee::server::middleware::http::HostFilterLayer;
use jsonrpsee::server::{Server, ServerConfig, ServerHandle};
use slog::Logger;
use tower::BoxError;
use tower::filter::{FilterLayer, Predicate};

use crate::api::RpcApi;
use crate::config::{HttpConfig, WsConfig};

/// Running RPC server.
pub struct RpcServerHandle {
    name: &'static str,
    local_addr: SocketAddr,
    handle: ServerHandle,
    logger: Logger,
}

impl RpcServerHandle {
    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint URL for clients, e.g. `http://127.0.0.1:8547`.
    pub fn endpoint(&self) -> String {
        format!("{}://{}", self.name, self.local_addr)
    }

    /// Stops accepting connections and waits for in-flight calls to finish.
    pub async fn stop(self) -> Result<()> {
        // A server that already stopped on its own still counts as stopped.
        let _ = self.handle.stop();
        self.handle.stopped().await;
        slog::info!(self.logger, "RPC server stopped"; "transport" => self.name, "addr" => %self.local_addr);
        Ok(())
    }
}

/// Binds and serves the HTTP endpoint.
pub async fn start_http(config: &HttpConfig, api: &RpcApi, logger: Logger) -> Result<RpcServerHandle> {
    let module = api.module(&config.modules())?;
    let filter = host_filter(&config.vhosts, &config.addr)?;
    let middleware = tower::ServiceBuilder::new().option_layer(filter);

    let server = Server::builder()
        .set_http_middleware(middleware)
        .set_config(ServerConfig::builder().http_only().build())
        .build((config.addr.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind http endpoint {}:{}", config.addr, config.port))?;
    let local_addr = server.local_addr()?;
    let handle = server.start(module);

    slog::info!(logger, "RPC server started"; "transport" => "http", "addr" => %local_addr, "api" => ?config.modules());
    Ok(RpcServerHandle {
        name: "http",
        local_addr,
        handle,
        logger,
    })
}

/// Binds and serves the WebSocket endpoint.
pub async fn start_ws(config: &WsConfig, api: &RpcApi, logger: Logger) -> Result<RpcServerHandle> {
    let module = api.module(&config.modules())?;
    let middleware = tower::ServiceBuilder::new().layer(FilterLayer::new(OriginFilter::new(
        &config.origins,
        logger.clone(),
    )));

    let server = Server::builder()
        .set_http_middleware(middleware)
        .set_config(ServerConfig::builder().ws_only().build())
        .build((config.addr.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind ws endpoint {}:{}", config.addr, config.port))?;
    let local_addr = server.local_addr()?;
    let handle = server.start(module);

    slog::info!(logger, "RPC server started"; "transport" => "ws", "addr" => %local_addr, "api" => ?config.modules());
    Ok(RpcServerHandle {
        name: "ws",
        local_addr,
        handle,
        logger,
    })
}

/// Host filter for `vhosts`; `None` when any host is accepted.
///
/// Entries match on any port. The listen address itself is always accepted.
fn host_filter(vhosts: &[String], listen_addr: &str) -> Result<Option<HostFilterLayer>> {
    if vhosts.iter().any(|host| host == "*") {
        return Ok(None);
    }
    let mut allowed: Vec<String> = vhosts.iter().map(|host| any_port(host)).collect();
    if !listen_addr.is_empty() {
        allowed.push(any_port(listen_addr));
    }
    let layer = HostFilterLayer::new(allowed.iter().map(String::as_str))
        .map_err(|e| anyhow::anyhow!("invalid http.vhosts entry: {e}"))?;
    Ok(Some(layer))
}

/// `localhost` → `localhost:*`, `::1` → `[::1]:*`; entries with a port are kept.
fn any_port(host: &str) -> String {
    let host = host.trim();
    if let Ok(IpAddr::V6(ip)) = host.parse::<IpAddr>() {
        return format!("[{ip}]:*");
    }
    let has_port = match host.rsplit_once(':') {
        Some((_, port)) => port == "*" || port.chars().all(|c| c.is_ascii_digit()),
        None => false,
    };
    if has_port {
        host.to_string()
    } else {
        format!("{host}:*")
    }
}

/// Rejects WebSocket handshakes whose `Origin` is not listed.
///
/// An empty list accepts every origin, and requests without an `Origin`
/// header come from non-browser clients and are accepted.
#[derive(Clone)]
struct OriginFilter {
    origins: Arc<Vec<String>>,
    logger: Logger,
}

impl OriginFilter {
    fn new(origins: &[String], logger: Logger) -> Self {
        Self {
            origins: Arc::new(origins.to_vec()),
            logger,
        }
    }

    fn allows(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(_) if self.origins.is_empty() => true,
            Some(origin) => self
                .origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

impl<B> Predicate<http::Request<B>> for OriginFilter {
    type Request = http::Request<B>;

    fn check(&mut self, request: http::Request<B>) -> Result<Self::Request, BoxError> {
        let origin = request
            .headers()
            .get(http::header::ORIGIN)
            .and_then(|value| value.to_str().ok());
        if self.allows(origin) {
            return Ok(request);
        }
        slog::debug!(self.logger, "Rejected WebSocket with invalid origin"; "origin" => ?origin);
        Err(format!("origin {origin:?} not allowed").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, U64, U256};
    use chain::{Account, Block, ChainStore};
    use http::{HeaderMap, HeaderValue};
    use jsonrpsee::core::ClientError;
    use jsonrpsee::core::client::ClientT;
    use jsonrpsee::http_client::HttpClientBuilder;
    use jsonrpsee::rpc_params;
    use jsonrpsee::ws_client::WsClientBuilder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn setup() -> (tempfile::TempDir, RpcApi) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        store
            .append_ancient(&Block::new(0, B256::ZERO, B256::ZERO, 0))
            .unwrap();
        store
            .put_account(&Account::new(Address::repeat_byte(1), U256::from(1000u64), 4))
            .unwrap();
        let api = RpcApi::new(
            store,
            412346,
            vec![Address::repeat_byte(1)],
            "l2-node/test",
            test_logger(),
        );
        (dir, api)
    }

    fn call_code(err: ClientError) -> i32 {
        match err {
            ClientError::Call(err) => err.code(),
            other => panic!("expected a call error, got {other}"),
        }
    }

    #[test]
    fn test_any_port() {
        assert_eq!(any_port("localhost"), "localhost:*");
        assert_eq!(any_port("localhost:8547"), "localhost:8547");
        assert_eq!(any_port("127.0.0.1"), "127.0.0.1:*");
        assert_eq!(any_port("::1"), "[::1]:*");
        assert_eq!(any_port("*.example.com"), "*.example.com:*");
    }

    #[test]
    fn test_wildcard_vhost_disables_filter() {
        assert!(host_filter(&strings(&["*"]), "127.0.0.1").unwrap().is_none());
        assert!(host_filter(&strings(&["localhost"]), "127.0.0.1").unwrap().is_some());
    }

    #[test]
    fn test_origin_filter() {
        let open = OriginFilter::new(&[], test_logger());
        assert!(open.allows(Some("http://anything")));

        let strict = OriginFilter::new(&strings(&["http://app"]), test_logger());
        assert!(strict.allows(None));
        assert!(strict.allows(Some("http://app")));
        assert!(strict.allows(Some("HTTP://APP")));
        assert!(!strict.allows(Some("http://other")));
    }

    async fn raw_post(addr: SocketAddr, host: &str, body: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST / HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_http_queries() {
        let (_dir, api) = setup();
        let config = HttpConfig {
            addr: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let handle = start_http(&config, &api, test_logger()).await.unwrap();
        assert!(handle.endpoint().starts_with("http://127.0.0.1:"));

        let client = HttpClientBuilder::default().build(handle.endpoint()).unwrap();
        let chain_id: U64 = client.request("eth_chainId", rpc_params![]).await.unwrap();
        assert_eq!(chain_id, U64::from(412346u64));
        let head: U64 = client.request("eth_blockNumber", rpc_params![]).await.unwrap();
        assert_eq!(head, U64::ZERO);
        let version: String = client.request("net_version", rpc_params![]).await.unwrap();
        assert_eq!(version, "412346");
        let client_version: String = client.request("web3_clientVersion", rpc_params![]).await.unwrap();
        assert_eq!(client_version, "l2-node/test");

        let known = Address::repeat_byte(1);
        let balance: U256 = client
            .request("eth_getBalance", rpc_params![known, "latest"])
            .await
            .unwrap();
        assert_eq!(balance, U256::from(1000u64));
        let nonce: U64 = client
            .request("eth_getTransactionCount", rpc_params![known, "0x0"])
            .await
            .unwrap();
        assert_eq!(nonce, U64::from(4u64));
        let empty: U256 = client
            .request("eth_getBalance", rpc_params![Address::repeat_byte(2)])
            .await
            .unwrap();
        assert_eq!(empty, U256::ZERO);

        let historical = client
            .request::<U256, _>("eth_getBalance", rpc_params![known, "0x5"])
            .await
            .unwrap_err();
        assert_eq!(call_code(historical), crate::api::SERVER_ERROR_CODE);

        // personal is not in the default http api list.
        let hidden = client
            .request::<Vec<Address>, _>("personal_listAccounts", rpc_params![])
            .await
            .unwrap_err();
        assert_eq!(call_code(hidden), -32601);

        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_http_filters_hosts_and_ignores_notifications() {
        let (_dir, api) = setup();
        let config = HttpConfig {
            addr: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let handle = start_http(&config, &api, test_logger()).await.unwrap();
        let addr = handle.local_addr();

        let call = r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId"}"#;
        let ok = raw_post(addr, "localhost:8547", call).await;
        assert!(ok.starts_with("HTTP/1.1 200"));
        assert!(ok.contains(r#""result":"0x64aba""#));

        let by_ip = raw_post(addr, &addr.to_string(), call).await;
        assert!(by_ip.starts_with("HTTP/1.1 200"));

        let rejected = raw_post(addr, "evil.example", call).await;
        assert!(rejected.starts_with("HTTP/1.1 403"));

        let notification = r#"{"jsonrpc":"2.0","method":"eth_chainId"}"#;
        let silent = raw_post(addr, "localhost", notification).await;
        assert!(!silent.contains("result"));
        assert!(!silent.contains("0x64aba"));

        handle.stop().await.unwrap();
        assert!(TcpStream::connect(addr).await.is_err());
    }

    fn ws_config(origins: &[&str], expose_all: bool) -> WsConfig {
        WsConfig {
            addr: "127.0.0.1".to_string(),
            port: 0,
            origins: strings(origins),
            expose_all,
            ..Default::default()
        }
    }

    fn origin_headers(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_str(origin).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_ws_rejects_unlisted_origin() {
        let (_dir, api) = setup();
        let handle = start_ws(&ws_config(&["http://app"], false), &api, test_logger())
            .await
            .unwrap();
        assert!(handle.endpoint().starts_with("ws://127.0.0.1:"));

        let allowed = WsClientBuilder::default()
            .set_headers(origin_headers("http://app"))
            .build(handle.endpoint())
            .await
            .unwrap();
        let chain_id: U64 = allowed.request("eth_chainId", rpc_params![]).await.unwrap();
        assert_eq!(chain_id, U64::from(412346u64));

        let refused = WsClientBuilder::default()
            .set_headers(origin_headers("http://evil"))
            .build(handle.endpoint())
            .await;
        assert!(refused.is_err());

        drop(allowed);
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_namespaces_follow_expose_all() {
        let (_dir, api) = setup();

        let plain = start_ws(&ws_config(&[], false), &api, test_logger()).await.unwrap();
        let client = WsClientBuilder::default().build(plain.endpoint()).await.unwrap();
        let hidden = client
            .request::<Vec<Address>, _>("personal_listAccounts", rpc_params![])
            .await
            .unwrap_err();
        assert_eq!(call_code(hidden), -32601);
        drop(client);
        plain.stop().await.unwrap();

        let exposed = start_ws(&ws_config(&[], true), &api, test_logger()).await.unwrap();
        let client = WsClientBuilder::default().build(exposed.endpoint()).await.unwrap();
        let accounts: Vec<Address> = client
            .request("personal_listAccounts", rpc_params![])
            .await
            .unwrap();
        assert_eq!(accounts, vec![Address::repeat_byte(1)]);
        drop(client);
        exposed.stop().await.unwrap();
    }
}
