//! Lazily bound publish and control sockets
//!
//! `SocketManager` is created once at startup and shared by reference. Each
//! socket is created and bound on first request; later requests return the
//! same handle. A failed bind leaves the slot empty so the next request tries
//! again.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::endpoint::Endpoint;
use crate::network::tcp::{TcpOptions, TcpTransport};
use crate::network::transport::{PublishSocket, SubscribeSocket, Transport};

/// Owner of the process's publish and control sockets
pub struct SocketManager<T: Transport = TcpTransport> {
    transport: T,
    publish_endpoint: Endpoint,
    control_endpoint: Endpoint,
    publisher: Mutex<Option<Arc<T::Publisher>>>,
    subscriber: Mutex<Option<Arc<T::Subscriber>>>,
}

impl SocketManager<TcpTransport> {
    /// TCP sockets configured from `config`
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(
            TcpTransport::new(TcpOptions::from(config)),
            config.publish_endpoint.clone(),
            config.control_endpoint.clone(),
        )
    }
}

impl<T: Transport> SocketManager<T> {
    pub fn new(transport: T, publish_endpoint: Endpoint, control_endpoint: Endpoint) -> Self {
        Self {
            transport,
            publish_endpoint,
            control_endpoint,
            publisher: Mutex::new(None),
            subscriber: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn publish_endpoint(&self) -> &Endpoint {
        &self.publish_endpoint
    }

    pub fn control_endpoint(&self) -> &Endpoint {
        &self.control_endpoint
    }

    /// Publish socket, bound on first use
    pub fn publisher(&self) -> Result<Arc<T::Publisher>, NetworkError> {
        let mut slot = self.publisher.lock();
        if let Some(socket) = slot.as_ref() {
            return Ok(socket.clone());
        }

        match self.transport.bind_publisher(&self.publish_endpoint) {
            Ok(socket) => {
                info!(
                    "publish socket {} ready on {}",
                    socket.id(),
                    self.publish_endpoint
                );
                let socket = Arc::new(socket);
                *slot = Some(socket.clone());
                Ok(socket)
            }
            Err(e) => {
                warn!(
                    "failed to open publish socket on {}: {}",
                    self.publish_endpoint, e
                );
                Err(e)
            }
        }
    }

    /// Control socket, bound on first use
    pub fn subscriber(&self) -> Result<Arc<T::Subscriber>, NetworkError> {
        let mut slot = self.subscriber.lock();
        if let Some(socket) = slot.as_ref() {
            return Ok(socket.clone());
        }

        match self.transport.bind_subscriber(&self.control_endpoint) {
            Ok(socket) => {
                info!(
                    "control socket {} ready on {}",
                    socket.id(),
                    self.control_endpoint
                );
                let socket = Arc::new(socket);
                *slot = Some(socket.clone());
                Ok(socket)
            }
            Err(e) => {
                warn!(
                    "failed to open control socket on {}: {}",
                    self.control_endpoint, e
                );
                Err(e)
            }
        }
    }

    pub fn is_publisher_open(&self) -> bool {
        self.publisher.lock().is_some()
    }

    pub fn is_subscriber_open(&self) -> bool {
        self.subscriber.lock().is_some()
    }

    /// Close both sockets and forget them. A later request binds afresh.
    pub fn shutdown(&self) {
        if let Some(socket) = self.publisher.lock().take() {
            socket.close();
        }
        if let Some(socket) = self.subscriber.lock().take() {
            socket.close();
        }
    }
}
