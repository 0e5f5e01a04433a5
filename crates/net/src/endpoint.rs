//! Session server addresses
//!
//! Format: poker://<host>:<port>/<token>

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Error, Result};

const SCHEME: &str = "poker://";

/// Where a session server lives and the token it expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    pub host: IpAddr,
    pub port: u16,
    pub token: String,
}

impl SessionEndpoint {
    pub fn new(host: IpAddr, port: u16, token: impl Into<String>) -> Self {
        Self {
            host,
            port,
            token: token.into(),
        }
    }

    pub fn from_addr(addr: SocketAddr, token: impl Into<String>) -> Self {
        Self::new(addr.ip(), addr.port(), token)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn to_url(&self) -> String {
        format!("{}{}/{}", SCHEME, self.socket_addr(), self.token)
    }

    pub fn parse(s: &str) -> Result<Self> {
        let rest = s
            .trim()
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::Protocol(format!("Invalid server URL: missing {}", SCHEME)))?;

        let (host_port, token) = rest.split_once('/').ok_or_else(|| {
            Error::Protocol("Invalid server URL: expected host:port/token".into())
        })?;

        let addr: SocketAddr = host_port.parse().map_err(|_| {
            Error::Protocol(format!("Invalid server URL: bad address '{}'", host_port))
        })?;

        if token.is_empty() || token.contains('/') {
            return Err(Error::Protocol("Invalid server URL: bad token".into()));
        }

        Ok(Self::from_addr(addr, token))
    }
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url())
    }
}

impl FromStr for SessionEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
