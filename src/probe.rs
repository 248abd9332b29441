//! Reachability probes for raw and HTTP endpoints

use crate::endpoint::{Endpoint, RawProtocol};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

const MAX_IDLE_CONNECTIONS: usize = 10;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("no {protocol} address found for {address}")]
    NoAddress {
        protocol: &'static str,
        address: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// Checks a single endpoint; holds a pooled HTTP client
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    http: reqwest::Client,
    timeout: Duration,
}

impl EndpointProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .build()?;
        Ok(Self { http, timeout })
    }

    /// `Ok` if the endpoint is reachable (HTTP: 2xx status)
    pub async fn probe(&self, endpoint: &Endpoint) -> Result<(), ProbeError> {
        match endpoint {
            Endpoint::Http { url, .. } => self.probe_http(url).await,
            Endpoint::Raw {
                protocol,
                host,
                port,
            } => {
                let address = format!("{}:{}", host, port);
                tokio::time::timeout(self.timeout, probe_raw(*protocol, &address))
                    .await
                    .map_err(|_| ProbeError::Timeout(self.timeout))?
            }
        }
    }

    async fn probe_http(&self, url: &str) -> Result<(), ProbeError> {
        debug!(url = %url, "Checking HTTP endpoint");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        // drain so the connection can return to the pool
        let _ = response.bytes().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(status.as_u16()))
        }
    }
}

async fn probe_raw(protocol: RawProtocol, address: &str) -> Result<(), ProbeError> {
    debug!(protocol = protocol.as_str(), address = %address, "Checking raw endpoint");
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address)
        .await?
        .filter(|addr| match protocol {
            RawProtocol::Tcp4 | RawProtocol::Udp4 => addr.is_ipv4(),
            RawProtocol::Tcp6 | RawProtocol::Udp6 => addr.is_ipv6(),
            RawProtocol::Tcp | RawProtocol::Udp => true,
        })
        .collect();

    let mut last_error = None;
    for addr in candidates {
        let outcome = if protocol.is_udp() {
            connect_udp(addr).await
        } else {
            TcpStream::connect(addr).await.map(drop)
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) => ProbeError::Connect(e),
        None => ProbeError::NoAddress {
            protocol: protocol.as_str(),
            address: address.to_string(),
        },
    })
}

async fn connect_udp(addr: SocketAddr) -> std::io::Result<()> {
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await
}
