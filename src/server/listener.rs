//! Relay server listener
//!
//! Handles the TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Result;
use crate::relay::RelayService;
use crate::server::auth::Authenticator;
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;

/// WebSocket relay server
pub struct RelayServer<A: Authenticator> {
    config: ServerConfig,
    authenticator: Arc<A>,
    service: Arc<RelayService>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<A: Authenticator> RelayServer<A> {
    /// Create a new server with its own relay service
    pub fn new(config: ServerConfig, authenticator: A) -> Self {
        let service = Arc::new(RelayService::with_outbound_capacity(
            config.outbound_queue_capacity,
        ));
        Self::with_service(config, authenticator, service)
    }

    /// Create a new server around an existing relay service
    pub fn with_service(config: ServerConfig, authenticator: A, service: Arc<RelayService>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            authenticator: Arc::new(authenticator),
            service,
            connection_semaphore,
        }
    }

    /// Get a reference to the relay service
    pub fn service(&self) -> &Arc<RelayService> {
        &self.service
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener until `shutdown`
    /// resolves, then shut the relay service down
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        self.service.shutdown().await;
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = match self.acquire_permit() {
            Ok(permit) => permit,
            Err(()) => {
                tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                self.service.stats().connection_rejected();
                return;
            }
        };

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection::new(
            peer_addr,
            self.config.clone(),
            Arc::clone(&self.authenticator),
            Arc::clone(&self.service),
        );
        let connection_id = connection.connection_id();

        tracing::debug!(connection_id = connection_id, peer = %peer_addr, "New connection");

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run(socket).await {
                tracing::debug!(
                    connection_id = connection_id,
                    error = %e,
                    "Connection error"
                );
            }
        });
    }

    fn acquire_permit(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.connection_semaphore {
            Some(sem) => sem.clone().try_acquire_owned().map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }
}
