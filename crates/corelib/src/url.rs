//! Node addresses.
//!
//! Addresses have the form `protocol://host[:port]/path`. The protocol
//! selects the transport and must be one of [`Protocol::ALL`]; the port
//! falls back to the protocol default when omitted.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Transport selected by an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Raw socket transport.
    Socket,
    /// In-process transport; all nodes live in the same process.
    Local,
    /// Binary RPC transport with a per-port naming service.
    Rpc,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Socket, Protocol::Local, Protocol::Rpc];

    pub fn name(self) -> &'static str {
        match self {
            Protocol::Socket => "ocsocket",
            Protocol::Local => "oclocal",
            Protocol::Rpc => "ocrmi",
        }
    }

    /// Port used when an address omits it. The in-process transport has none.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Protocol::Socket => Some(4242),
            Protocol::Local => None,
            Protocol::Rpc => Some(4242),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownProtocol(s.to_string()))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed, comparable node address.
///
/// Equality and hashing ignore ASCII case on host (the protocol is already
/// normalized by parsing) and are exact on port and path. The canonical
/// string form is lower-cased and rendered once.
#[derive(Clone)]
pub struct Url {
    protocol: Protocol,
    host: String,
    port: Option<u16>,
    path: String,
    canonical: OnceLock<String>,
}

impl Url {
    pub fn parse(s: &str) -> Result<Url> {
        let malformed = |reason| Error::MalformedUrl(s.to_string(), reason);

        let (protocol, rest) = s.split_once("://").ok_or_else(|| malformed("missing \"://\""))?;
        let protocol: Protocol = protocol.parse()?;

        let (authority, path) = rest
            .split_once('/')
            .ok_or_else(|| malformed("missing \"/\" after host"))?;

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                let port: u64 = port.parse().map_err(|_| malformed("port is not numeric"))?;
                if !(1..=u16::MAX as u64).contains(&port) {
                    return Err(malformed("port must be between 1 and 65535"));
                }
                (host, Some(port as u16))
            }
            None => (authority, protocol.default_port()),
        };

        if host.is_empty() {
            return Err(malformed("missing host"));
        }

        Ok(Url {
            protocol,
            host: host.to_string(),
            port,
            path: path.to_string(),
            canonical: OnceLock::new(),
        })
    }

    #[inline]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port`, for transports that bind or dial a socket.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Lower-cased canonical form, cached after the first call.
    pub fn as_str(&self) -> &str {
        self.canonical
            .get_or_init(|| self.render().to_lowercase())
    }

    // Case-preserving form; used on the wire so paths keep their case.
    fn render(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}/{}", self.protocol, self.host, port, self.path),
            None => format!("{}://{}/{}", self.protocol, self.host, self.path),
        }
    }
}

impl FromStr for Url {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Url::parse(s)
    }
}

impl PartialEq for Url {
    fn eq(&self, other: &Self) -> bool {
        self.protocol == other.protocol
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.path == other.path
    }
}

impl Eq for Url {}

impl Hash for Url {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.protocol.hash(state);
        self.host.to_ascii_lowercase().hash(state);
        self.port.hash(state);
        self.path.hash(state);
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Url({})", self.render())
    }
}

impl Serialize for Url {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

impl<'de> Deserialize<'de> for Url {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Url::parse(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let url = Url::parse("ocsocket://Host:1234/Path").unwrap();
        assert_eq!(url.protocol(), Protocol::Socket);
        assert_eq!(url.host(), "Host");
        assert_eq!(url.port(), Some(1234));
        assert_eq!(url.path(), "Path");
        assert_eq!(url.to_string(), "ocsocket://host:1234/path");
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Url::parse("ocsocket://h/").unwrap().port(), Some(4242));
        assert_eq!(Url::parse("ocrmi://h/").unwrap().port(), Some(4242));
        assert_eq!(Url::parse("oclocal://h/").unwrap().port(), None);
        assert_eq!(Url::parse("oclocal://h/x").unwrap().to_string(), "oclocal://h/x");
    }

    #[test]
    fn test_malformed() {
        for bad in [
            "ocsocket:/host:1/",
            "ocsocket://host:abc/",
            "ocsocket://host:0/",
            "ocsocket://host:65536/",
            "ocsocket://host:1",
            "ocsocket://:1/",
        ] {
            assert!(
                matches!(Url::parse(bad), Err(Error::MalformedUrl(..))),
                "{bad} should be rejected"
            );
        }
        assert!(matches!(
            Url::parse("http://host:80/"),
            Err(Error::UnknownProtocol(p)) if p == "http"
        ));
    }

    #[test]
    fn test_equality_case_rules() {
        let a = Url::parse("OCSOCKET://HOST:1/path").unwrap();
        let b = Url::parse("ocsocket://host:1/path").unwrap();
        let c = Url::parse("ocsocket://host:1/PATH").unwrap();
        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_ne!(b, Url::parse("ocsocket://host:2/path").unwrap());
    }
}
