//! `ws://` / `wss://` URL parsing

use std::fmt;

use crate::error::HandshakeError;

/// Parsed WebSocket endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub secure: bool,
    /// Host without brackets or port
    pub host: String,
    pub port: u16,
    /// Request target: path plus query, always starting with `/`
    pub resource: String,
}

impl WsUrl {
    /// Parse a `ws://` or `wss://` URL
    ///
    /// Default ports are 80 and 443. A missing path becomes `/`, the query
    /// string is preserved and a fragment is dropped.
    pub fn parse(url: &str) -> Result<Self, HandshakeError> {
        let invalid = |why: &str| HandshakeError::InvalidUrl(format!("{url}: {why}"));

        let (scheme, rest) = url.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let secure = match scheme.to_ascii_lowercase().as_str() {
            "ws" => false,
            "wss" => true,
            _ => return Err(invalid("scheme must be ws or wss")),
        };

        let rest = rest.split_once('#').map_or(rest, |(before, _)| before);
        let split_at = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, target) = rest.split_at(split_at);
        if authority.contains('@') {
            return Err(invalid("credentials are not supported"));
        }

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match after.strip_prefix(':') {
                Some(p) => Some(p),
                None if after.is_empty() => None,
                None => return Err(invalid("unexpected text after IPv6 literal")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None if secure => 443,
            None => 80,
        };

        let resource = if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{target}")
        };

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            resource,
        })
    }

    #[must_use]
    pub fn default_port(&self) -> u16 {
        if self.secure {
            443
        } else {
            80
        }
    }

    /// Value for the `Host` header; the port appears only when non-default
    #[must_use]
    pub fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// `host:port` for socket address resolution
    #[must_use]
    pub fn socket_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl fmt::Display for WsUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}{}", self.host_header(), self.resource)
    }
}
