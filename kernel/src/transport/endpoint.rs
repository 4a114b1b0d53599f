//! Addressing descriptors resolved into dialable addresses.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use super::TransportError;

const DIRECT_SCHEME: &str = "direct";
const DISCOVERY_SCHEME: &str = "discovery";

/// Where a client should connect.
///
/// The textual form is `direct://host:port` for a fixed address or
/// `discovery://service-name` for a service resolved through discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// A fixed `host:port` address.
    Direct(String),
    /// A service name looked up through discovery.
    Discovery(String),
}

impl Endpoint {
    /// Fixed address endpoint.
    pub fn direct(addr: impl Into<String>) -> Self {
        Self::Direct(addr.into())
    }

    /// Endpoint resolved through discovery.
    pub fn discovery(service: impl Into<String>) -> Self {
        Self::Discovery(service.into())
    }

    /// Canonical target string.
    #[must_use]
    pub fn target(&self) -> String {
        self.to_string()
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::Direct(addr.to_string())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct(addr) => write!(f, "{DIRECT_SCHEME}://{addr}"),
            Endpoint::Discovery(name) => write!(f, "{DISCOVERY_SCHEME}://{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidTarget(s.to_string());
        let (scheme, rest) = s.split_once("://").ok_or_else(invalid)?;
        if rest.is_empty() || rest.contains('/') {
            return Err(invalid());
        }
        match scheme {
            DIRECT_SCHEME => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid());
                }
                Ok(Self::Direct(rest.to_string()))
            }
            DISCOVERY_SCHEME => Ok(Self::Discovery(rest.to_string())),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_schemes() {
        assert_eq!(
            "direct://127.0.0.1:9000".parse::<Endpoint>().unwrap(),
            Endpoint::direct("127.0.0.1:9000")
        );
        assert_eq!(
            "discovery://gate".parse::<Endpoint>().unwrap(),
            Endpoint::discovery("gate")
        );
    }

    #[test]
    fn target_is_canonical() {
        let endpoint = Endpoint::from(SocketAddr::from(([10, 0, 0, 1], 7000)));
        assert_eq!(endpoint.target(), "direct://10.0.0.1:7000");
        assert_eq!(endpoint.target().parse::<Endpoint>().unwrap(), endpoint);
    }

    #[test]
    fn rejects_malformed_targets() {
        for target in [
            "",
            "gate",
            "127.0.0.1:7000",
            "tcp://127.0.0.1:1",
            "direct://",
            "direct://localhost",
            "direct://localhost:http",
            "direct://:80",
            "discovery://",
            "discovery://a/b",
        ] {
            assert!(
                matches!(target.parse::<Endpoint>(), Err(TransportError::InvalidTarget(_))),
                "{target} should be rejected"
            );
        }
    }
}
