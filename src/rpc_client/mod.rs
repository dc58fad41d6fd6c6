// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! JSON-RPC client for a Lotus-API compatible full node, and the
//! [`ChainGateway`](crate::chain::ChainGateway) built on top of it.

mod gateway;
mod types;

pub use gateway::LotusGateway;

use std::{env, fmt, str::FromStr, time::Duration};

use anyhow::Context as _;
use http::{HeaderMap, HeaderValue, header};
use jsonrpsee::core::{ClientError, client::ClientT as _, traits::ToRpcParams};
use multiaddr::{Multiaddr, Protocol};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::{DisplayFromStr, DurationSeconds, serde_as};
use tracing::trace;
use url::Url;

pub const API_INFO_KEY: &str = "FULLNODE_API_INFO";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const RPC_PATH: &str = "/rpc/v1";

/// Token and endpoint of a full node, in the `token:multiaddr` form used by
/// `FULLNODE_API_INFO`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiInfo {
    multiaddr: Multiaddr,
    url: Url,
    pub token: Option<String>,
}

impl fmt::Display for ApiInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(token) = &self.token {
            token.fmt(f)?;
            write!(f, ":")?;
        }
        self.multiaddr.fmt(f)
    }
}

impl FromStr for ApiInfo {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (token, host) = match s.split_once(':') {
            Some((token, host)) => (Some(token), host),
            None => (None, s),
        };
        let multiaddr: Multiaddr = host.parse()?;
        let mut url = multiaddr2url(&multiaddr).context("couldn't convert multiaddr to URL")?;
        url.set_path(RPC_PATH);
        Ok(ApiInfo {
            multiaddr,
            url,
            token: token.map(String::from),
        })
    }
}

impl Default for ApiInfo {
    fn default() -> Self {
        "/ip4/127.0.0.1/tcp/1234/http"
            .parse()
            .expect("default api info is valid")
    }
}

impl ApiInfo {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// `FULLNODE_API_INFO` if set, otherwise `fallback`. Fails if the variable
    /// is malformed.
    pub fn from_env_or(fallback: ApiInfo) -> anyhow::Result<Self> {
        match env::var(API_INFO_KEY) {
            Ok(it) => it
                .parse()
                .with_context(|| format!("invalid {API_INFO_KEY}")),
            Err(env::VarError::NotPresent) => Ok(fallback),
            Err(it @ env::VarError::NotUnicode(_)) => Err(it.into()),
        }
    }
}

/// `[api]` section of the daemon configuration.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub info: ApiInfo,
    /// Timeout of ordinary requests.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    /// Timeout of requests that block on the chain, like waiting for a message.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub wait_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            info: ApiInfo::default(),
            request_timeout: DEFAULT_TIMEOUT,
            wait_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Positional parameters, already in lotus JSON.
pub struct Params(serde_json::Value);

impl Params {
    pub fn new(params: impl Serialize) -> Result<Self, ClientError> {
        match serde_json::to_value(params) {
            Ok(value @ serde_json::Value::Array(_)) => Ok(Self(value)),
            Ok(serde_json::Value::Null) => Ok(Self(serde_json::Value::Array(vec![]))),
            Ok(other) => Ok(Self(serde_json::Value::Array(vec![other]))),
            Err(e) => Err(ClientError::Custom(format!("invalid parameters: {e}"))),
        }
    }
}

impl ToRpcParams for Params {
    fn to_rpc_params(self) -> Result<Option<Box<serde_json::value::RawValue>>, serde_json::Error> {
        Ok(Some(serde_json::value::to_raw_value(&self.0)?))
    }
}

enum ClientInner {
    Ws(jsonrpsee::ws_client::WsClient),
    Https(jsonrpsee::http_client::HttpClient),
}

/// A connection to one endpoint, over HTTP or websocket depending on the scheme.
pub struct Client {
    inner: ClientInner,
    url: Url,
}

impl Client {
    pub async fn from_api_info(info: &ApiInfo, timeout: Duration) -> Result<Self, ClientError> {
        Self::from_url(info.url.clone(), info.token.as_deref(), timeout).await
    }

    pub async fn from_url(
        url: Url,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let headers = match token {
            Some(it) => HeaderMap::from_iter([(
                header::AUTHORIZATION,
                match HeaderValue::from_str(&format!("Bearer {it}")) {
                    Ok(it) => it,
                    Err(e) => {
                        return Err(ClientError::Custom(format!(
                            "Invalid authorization token: {e}"
                        )));
                    }
                },
            )]),
            None => Default::default(),
        };
        let inner = match url.scheme() {
            "ws" | "wss" => ClientInner::Ws(
                jsonrpsee::ws_client::WsClientBuilder::new()
                    .set_headers(headers)
                    .request_timeout(timeout)
                    .build(&url)
                    .await?,
            ),
            "http" | "https" => ClientInner::Https(
                jsonrpsee::http_client::HttpClientBuilder::new()
                    .set_headers(headers)
                    .request_timeout(timeout)
                    .build(&url)?,
            ),
            it => return Err(ClientError::Custom(format!("Unsupported URL scheme: {it}"))),
        };
        Ok(Self { inner, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Params,
    ) -> Result<R, ClientError> {
        trace!(method, "rpc call");
        match &self.inner {
            ClientInner::Ws(it) => it.request(method, params).await,
            ClientInner::Https(it) => it.request(method, params).await,
        }
    }
}

/// `"/dns/example.com/tcp/8080/http" -> "http://example.com:8080/"`
///
/// Returns [`None`] on unsupported formats, or if there is a URL parsing error.
///
/// Note that [`Multiaddr`]s do NOT support a (URL) `path`, so that must be handled
/// out-of-band.
fn multiaddr2url(m: &Multiaddr) -> Option<Url> {
    let mut components = m.iter().peekable();
    let host = match components.next()? {
        Protocol::Dns(it) | Protocol::Dns4(it) | Protocol::Dns6(it) | Protocol::Dnsaddr(it) => {
            it.to_string()
        }
        Protocol::Ip4(it) => it.to_string(),
        Protocol::Ip6(it) => format!("[{it}]"),
        _ => return None,
    };
    let port = match components.next_if(|it| matches!(it, Protocol::Tcp(_))) {
        Some(Protocol::Tcp(port)) => Some(port),
        _ => None,
    };
    let scheme = match components.next()? {
        Protocol::Http => "http",
        Protocol::Https => "https",
        Protocol::Ws(it) if it == "/" => "ws",
        Protocol::Wss(it) if it == "/" => "wss",
        _ => return None,
    };
    let None = components.next() else { return None };
    let parse_me = match port {
        Some(port) => format!("{scheme}://{host}:{port}"),
        None => format!("{scheme}://{host}"),
    };
    parse_me.parse().ok()
}
