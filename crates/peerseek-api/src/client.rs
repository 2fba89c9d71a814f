//! reqwest-backed [`Transport`] used by the daemon.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;

use peerseek_services::protocol::MAX_RESPONSE_BYTES;
use peerseek_services::{Endpoint, Transport, TransportError};

const USER_AGENT: &str = concat!("peerseek/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Peer traffic skips certificate validation and system proxies.
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    async fn send(
        &self,
        target: Endpoint,
        path: &str,
        form: &[(&'static str, String)],
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let map_err = |e: reqwest::Error| classify(e, target.secure);
        let mut resp = self
            .client
            .post(target.url(path))
            .form(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        if let Some(len) = resp.content_length() {
            if len as usize > MAX_RESPONSE_BYTES {
                return Err(TransportError::Body(format!("{} bytes announced", len)));
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await.map_err(map_err)? {
            if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(TransportError::Body("response too large".to_string()));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}

fn classify(e: reqwest::Error, secure: bool) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        if secure {
            TransportError::Tls(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    } else {
        TransportError::Body(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn post<'a>(
        &'a self,
        target: Endpoint,
        path: &'a str,
        form: &'a [(&'static str, String)],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        self.send(target, path, form, timeout).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // bind then drop to get a port nobody listens on
        let addr = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let t = HttpTransport::new().unwrap();
        let err = t
            .post(Endpoint::plain(addr), "/peer/hello", &[], Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_unreachable(), "{err:?}");
    }
}
