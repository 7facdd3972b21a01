//! Client-facing TCP listener.
//!
//! Concurrency is capped at `listener.max_connections`: a slot is taken
//! before `accept`, so at the cap new clients queue in the kernel backlog
//! instead of being accepted and starved.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The slot semaphore was closed; no further clients will be accepted.
    #[error("listener closed")]
    Closed,
}

/// One accepted client and the slot it occupies.
#[derive(Debug)]
pub struct AcceptedClient {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub slot: ClientSlot,
}

/// Held for the lifetime of a client task; dropping it frees the slot.
#[derive(Debug)]
pub struct ClientSlot {
    _permit: OwnedSemaphorePermit,
}

pub struct Listener {
    socket: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source: std::io::Error| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };

        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        let bound = socket.local_addr().map_err(bind_error)?;

        tracing::info!(address = %bound, max_connections = config.max_connections, "Client listener bound");
        Ok(Self {
            socket,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Wait for a free slot, then for the next client.
    pub async fn accept(&self) -> Result<AcceptedClient, ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;
        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        // Payloads are a single small chunk each way.
        let _ = stream.set_nodelay(true);

        tracing::debug!(peer = %peer, free_slots = self.slots.available_permits(), "Client accepted");
        Ok(AcceptedClient {
            stream,
            peer,
            slot: ClientSlot { _permit: permit },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
