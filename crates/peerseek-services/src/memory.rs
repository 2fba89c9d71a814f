//! In-process [`Transport`] for tests and simulations.
//!
//! Each endpoint gets a handler that decides how the "peer" behaves: answer,
//! answer late, fail, or never answer. Unrouted endpoints refuse the
//! connection.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::transport::{Endpoint, Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Behaviour {
    Reply(Bytes),
    Delay(Duration, Bytes),
    Fail(TransportError),
    /// Never answers; the caller's timeout fires.
    Hang,
}

type Handler = Arc<dyn Fn(&str, &[(&'static str, String)]) -> Behaviour + Send + Sync>;

/// A request seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub target: Endpoint,
    pub path: String,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    routes: Arc<DashMap<Endpoint, Handler>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(&self, target: Endpoint, handler: F)
    where
        F: Fn(&str, &[(&'static str, String)]) -> Behaviour + Send + Sync + 'static,
    {
        self.routes.insert(target, Arc::new(handler));
    }

    /// Answer every request at `target` the same way.
    pub fn route_fixed(&self, target: Endpoint, behaviour: Behaviour) {
        self.route(target, move |_, _| behaviour.clone());
    }

    pub fn unroute(&self, target: &Endpoint) {
        self.routes.remove(target);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Transport for MemoryTransport {
    fn post<'a>(
        &'a self,
        target: Endpoint,
        path: &'a str,
        form: &'a [(&'static str, String)],
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Call {
                target,
                path: path.to_string(),
            });
        let handler = self.routes.get(&target).map(|h| h.value().clone());
        let behaviour = handler
            .map(|h| h(path, form))
            .unwrap_or_else(|| Behaviour::Fail(TransportError::Connect("connection refused".into())));

        async move {
            match behaviour {
                Behaviour::Reply(body) => Ok(body),
                Behaviour::Fail(e) => Err(e),
                Behaviour::Delay(d, body) if d < timeout => {
                    tokio::time::sleep(d).await;
                    Ok(body)
                }
                Behaviour::Delay(..) | Behaviour::Hang => {
                    tokio::time::sleep(timeout).await;
                    Err(TransportError::Timeout)
                }
            }
        }
        .boxed()
    }
}
