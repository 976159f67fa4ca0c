//! Textual endpoint addresses.

use std::fmt;

use url::Url;

/// Network name reported by every [`Addr`].
pub const NETWORK: &str = "websocket";

/// Endpoint address of a WebSocket stream connection.
///
/// The address is kept as text; it is whatever the transport reported,
/// usually `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Addr(String);

impl Addr {
    /// Wrap a textual address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The unspecified address, used where the environment hides the local endpoint.
    pub fn unspecified() -> Self {
        Self::new("0.0.0.0:0")
    }

    /// Derive an address from a WebSocket URL.
    ///
    /// `ws://example.com/chat` becomes `example.com:80`. Input that does not
    /// parse as a URL falls back to stripping the scheme and trailing slash.
    pub fn from_url(raw: &str) -> Self {
        if let Ok(url) = Url::parse(raw)
            && let Some(host) = url.host_str()
        {
            return match url.port_or_known_default() {
                Some(port) => Self(format!("{host}:{port}")),
                None => Self(host.to_string()),
            };
        }

        let trimmed = raw
            .strip_prefix("ws://")
            .or_else(|| raw.strip_prefix("wss://"))
            .unwrap_or(raw);
        Self(trimmed.strip_suffix('/').unwrap_or(trimmed).to_string())
    }

    /// Name of the network, always `"websocket"`.
    pub fn network(&self) -> &'static str {
        NETWORK
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Addr {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

impl From<&str> for Addr {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl AsRef<str> for Addr {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
