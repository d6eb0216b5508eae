//! Transport endpoint addresses
//!
//! Endpoints use the `tcp://host:port` form. A host of `*` binds every
//! interface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::error::NetworkError;

const TCP_SCHEME: &str = "tcp://";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    /// All interfaces
    Wildcard,
    Ip(IpAddr),
    Name(String),
}

/// A `tcp://` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: Host,
    port: u16,
}

impl Endpoint {
    pub fn tcp(host: Host, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.host == Host::Wildcard
    }

    pub fn is_loopback(&self) -> bool {
        match &self.host {
            Host::Ip(ip) => ip.is_loopback(),
            Host::Name(name) => name == "localhost",
            Host::Wildcard => false,
        }
    }

    /// Whether binding both endpoints would compete for the same port.
    ///
    /// A wildcard or unspecified host overlaps every host. Port 0 never
    /// conflicts since the system picks a free port.
    pub fn conflicts_with(&self, other: &Endpoint) -> bool {
        if self.port != other.port || self.port == 0 {
            return false;
        }
        self.binds_all_interfaces() || other.binds_all_interfaces() || self.host == other.host
    }

    fn binds_all_interfaces(&self) -> bool {
        match &self.host {
            Host::Wildcard => true,
            Host::Ip(ip) => ip.is_unspecified(),
            Host::Name(_) => false,
        }
    }

    /// Resolve to a socket address suitable for binding or connecting
    pub fn socket_addr(&self) -> Result<SocketAddr, NetworkError> {
        match &self.host {
            Host::Wildcard => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)),
            Host::Ip(ip) => Ok(SocketAddr::new(*ip, self.port)),
            Host::Name(name) => (name.as_str(), self.port)
                .to_socket_addrs()
                .map_err(|e| NetworkError::InvalidEndpoint(format!("{}: {}", self, e)))?
                .next()
                .ok_or_else(|| {
                    NetworkError::InvalidEndpoint(format!("{} resolved to no address", self))
                }),
        }
    }
}

impl FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| NetworkError::InvalidEndpoint(format!("{:?}: {}", s, why));

        let rest = s
            .strip_prefix(TCP_SCHEME)
            .ok_or_else(|| invalid("only tcp:// endpoints are supported"))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        let host = match host {
            "" => return Err(invalid("missing host")),
            "*" => Host::Wildcard,
            bracketed if bracketed.starts_with('[') && bracketed.ends_with(']') => {
                let ip = bracketed[1..bracketed.len() - 1]
                    .parse()
                    .map_err(|_| invalid("invalid IPv6 address"))?;
                Host::Ip(ip)
            }
            other if other.contains(':') => {
                return Err(invalid("IPv6 addresses must be bracketed"))
            }
            other => match other.parse::<IpAddr>() {
                Ok(ip) => Host::Ip(ip),
                Err(_) => Host::Name(other.to_string()),
            },
        };

        Ok(Self { host, port })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Host::Wildcard => write!(f, "{}*:{}", TCP_SCHEME, self.port),
            Host::Ip(IpAddr::V6(ip)) => write!(f, "{}[{}]:{}", TCP_SCHEME, ip, self.port),
            Host::Ip(ip) => write!(f, "{}{}:{}", TCP_SCHEME, ip, self.port),
            Host::Name(name) => write!(f, "{}{}:{}", TCP_SCHEME, name, self.port),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::tcp(Host::Ip(addr.ip()), addr.port())
    }
}
