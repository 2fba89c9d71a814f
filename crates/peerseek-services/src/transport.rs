//! Transport seam between the protocol logic and the network.
//!
//! Every peer request is a form POST answered with a body. The daemon plugs
//! in an HTTP client; tests plug in [`crate::memory::MemoryTransport`].

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;

/// One way of reaching a peer: an address, a port, and whether to use TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: SocketAddr,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(addr: SocketAddr, secure: bool) -> Self {
        Self { addr, secure }
    }

    pub fn plain(addr: SocketAddr) -> Self {
        Self::new(addr, false)
    }

    pub fn url(&self, path: &str) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{path}", self.addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url(""))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls failed: {0}")]
    Tls(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("bad body: {0}")]
    Body(String),
}

impl TransportError {
    /// The address did not answer at all, as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_) | Self::Tls(_))
    }
}

pub trait Transport: Send + Sync {
    /// POST `form` to `path` at `target` and return the response body.
    /// Implementations must give up after `timeout`.
    fn post<'a>(
        &'a self,
        target: Endpoint,
        path: &'a str,
        form: &'a [(&'static str, String)],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TransportError>>;
}
