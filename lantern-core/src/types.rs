//! Endpoint addressing.
//!
//! An [`Endpoint`] is a parsed URI of the form `scheme://host[:port]/service`:
//! - the **scheme** selects the transport (`tcp`, `inproc`, `null`, ...)
//! - **host** and **port** locate the far end
//! - the **path** names the service hosted there

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Immutable address of a service.
///
/// Equality and hashing cover every component, so `tcp://a:1/Foo` and
/// `tcp://a:1/Bar` are different endpoints even though they share a socket
/// address.
///
/// # Examples
///
/// ```
/// use lantern_core::Endpoint;
///
/// let endpoint: Endpoint = "tcp://127.0.0.1:4500/Echo".parse().unwrap();
/// assert_eq!(endpoint.scheme(), "tcp");
/// assert_eq!(endpoint.host(), "127.0.0.1");
/// assert_eq!(endpoint.port(), Some(4500));
/// assert_eq!(endpoint.path(), "Echo");
/// assert_eq!(endpoint.to_string(), "tcp://127.0.0.1:4500/Echo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Endpoint {
    /// Parse an endpoint URI.
    ///
    /// The scheme is lower-cased. IPv6 hosts use bracket notation
    /// (`tcp://[::1]:4500/Echo`). Leading and trailing `/` are stripped from the
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointParseError`] if the scheme separator is missing, the
    /// scheme contains invalid characters, or the port is not a `u16`.
    pub fn parse(s: &str) -> Result<Self, EndpointParseError> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or(EndpointParseError::MissingScheme)?;

        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(EndpointParseError::InvalidScheme(scheme.to_string()));
        }

        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index + 1..]),
            None => (rest, ""),
        };

        let (host, port) = parse_authority(authority)?;

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host,
            port,
            path: path.trim_matches('/').to_string(),
        })
    }

    /// Transport selector, always lower case.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host name or IP literal (without IPv6 brackets).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, if the URI carried one.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Service path without surrounding slashes.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// `host:port` string suitable for `TcpStream::connect`.
    ///
    /// Returns `None` when the endpoint has no port.
    pub fn socket_address(&self) -> Option<String> {
        let port = self.port?;
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => Some(format!("[{}]:{}", ip, port)),
            _ => Some(format!("{}:{}", self.host, port)),
        }
    }

    /// Derive the endpoint of a named service hosted at the same address.
    ///
    /// This is the whole of endpoint resolution the runtime needs: real
    /// discovery produces a base endpoint, the stub appends its service name.
    pub fn with_service(&self, service: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            port: self.port,
            path: service.trim_matches('/').to_string(),
        }
    }

    fn authority(&self) -> String {
        match (self.socket_address(), self.host.parse::<IpAddr>()) {
            (Some(address), _) => address,
            (None, Ok(IpAddr::V6(ip))) => format!("[{}]", ip),
            (None, _) => self.host.clone(),
        }
    }
}

fn parse_authority(authority: &str) -> Result<(String, Option<u16>), EndpointParseError> {
    // IPv6 bracket notation [::1]:port
    if let Some(stripped) = authority.strip_prefix('[') {
        let (ip, after) = stripped
            .split_once(']')
            .ok_or_else(|| EndpointParseError::InvalidHost(authority.to_string()))?;
        ip.parse::<IpAddr>()
            .map_err(|_| EndpointParseError::InvalidHost(authority.to_string()))?;

        let port = match after {
            "" => None,
            _ => Some(parse_port(after.strip_prefix(':').ok_or_else(|| {
                EndpointParseError::InvalidHost(authority.to_string())
            })?)?),
        };
        return Ok((ip.to_string(), port));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), Some(parse_port(port)?))),
        None => Ok((authority.to_string(), None)),
    }
}

fn parse_port(s: &str) -> Result<u16, EndpointParseError> {
    s.parse()
        .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority(), self.path)
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Error parsing an endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointParseError {
    /// No `://` separator was found.
    #[error("missing scheme separator")]
    MissingScheme,
    /// The scheme is empty or has characters outside `[A-Za-z0-9+-.]`.
    #[error("invalid scheme: {0:?}")]
    InvalidScheme(String),
    /// The host part is malformed.
    #[error("invalid host: {0:?}")]
    InvalidHost(String),
    /// The port is not a number in `0..=65535`.
    #[error("invalid port: {0:?}")]
    InvalidPort(String),
}
