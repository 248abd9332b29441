//! Health check endpoints
//!
//! An endpoint is written `scheme://rest`. `http` and `https` endpoints keep
//! the whole string as their URL; every other scheme is a raw socket endpoint
//! and `rest` must be `host:port`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Endpoint malformed: '{0}'")]
    Malformed(String),

    #[error("Address malformed: '{0}'")]
    MalformedAddress(String),

    #[error("Unsupported protocol '{0}', expected http, https, tcp, tcp4, tcp6, udp, udp4 or udp6")]
    UnsupportedProtocol(String),
}

/// Transport used by a raw endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawProtocol {
    Tcp,
    Tcp4,
    Tcp6,
    Udp,
    Udp4,
    Udp6,
}

impl RawProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawProtocol::Tcp => "tcp",
            RawProtocol::Tcp4 => "tcp4",
            RawProtocol::Tcp6 => "tcp6",
            RawProtocol::Udp => "udp",
            RawProtocol::Udp4 => "udp4",
            RawProtocol::Udp6 => "udp6",
        }
    }

    pub fn is_udp(&self) -> bool {
        matches!(self, RawProtocol::Udp | RawProtocol::Udp4 | RawProtocol::Udp6)
    }
}

impl FromStr for RawProtocol {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(RawProtocol::Tcp),
            "tcp4" => Ok(RawProtocol::Tcp4),
            "tcp6" => Ok(RawProtocol::Tcp6),
            "udp" => Ok(RawProtocol::Udp),
            "udp4" => Ok(RawProtocol::Udp4),
            "udp6" => Ok(RawProtocol::Udp6),
            other => Err(EndpointError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// A single thing to probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Raw socket endpoint, checked by opening a connection
    Raw {
        protocol: RawProtocol,
        host: String,
        port: u16,
    },
    /// HTTP(S) endpoint, checked by a GET expecting a 2xx status
    Http { secure: bool, url: String },
}

impl Endpoint {
    pub fn protocol(&self) -> &'static str {
        match self {
            Endpoint::Raw { protocol, .. } => protocol.as_str(),
            Endpoint::Http { secure: true, .. } => "https",
            Endpoint::Http { secure: false, .. } => "http",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, Endpoint::Http { .. })
    }

    /// `host:port` of a raw endpoint
    pub fn address(&self) -> Option<String> {
        match self {
            Endpoint::Raw { host, port, .. } => Some(format!("{}:{}", host, port)),
            Endpoint::Http { .. } => None,
        }
    }

    /// Full URL of an HTTP endpoint
    pub fn url(&self) -> Option<&str> {
        match self {
            Endpoint::Http { url, .. } => Some(url),
            Endpoint::Raw { .. } => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Raw { host, port, .. } => write!(f, "{}:{}", host, port),
            Endpoint::Http { url, .. } => f.write_str(url),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty() && !scheme.contains(char::is_whitespace))
            .ok_or_else(|| EndpointError::Malformed(s.to_string()))?;

        match scheme {
            "http" | "https" => Ok(Endpoint::Http {
                secure: scheme == "https",
                url: s.to_string(),
            }),
            _ => {
                let protocol = scheme.parse::<RawProtocol>()?;
                let (host, port) = parse_address(rest)?;
                Ok(Endpoint::Raw {
                    protocol,
                    host,
                    port,
                })
            }
        }
    }
}

/// Split `host:port`, where the port is the digits after the last colon
fn parse_address(address: &str) -> Result<(String, u16), EndpointError> {
    let malformed = || EndpointError::MalformedAddress(address.to_string());

    let (host, port) = address.rsplit_once(':').ok_or_else(malformed)?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(malformed());
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let port = port.parse::<u16>().map_err(|_| malformed())?;

    Ok((host.to_string(), port))
}

/// Parse every configured endpoint, failing on the first malformed one
pub fn parse_endpoints<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Endpoint>, EndpointError> {
    raw.iter().map(|s| s.as_ref().parse()).collect()
}

#[cfg(test)]
#[path = "endpoint_test.rs"]
mod tests;
