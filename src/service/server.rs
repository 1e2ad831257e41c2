use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{Authorizer, ServerHandshake};
use crate::transport::connection::{Connection, PackageHandler};
use crate::transport::listener::Listener;
use crate::utils::metrics::global_metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

/// Listener that authorizes every accepted connection.
///
/// Connections that pass the handshake get the application handler (if any)
/// and are delivered on the channel returned by [`Server::start`].
pub struct Server {
    config: NetworkConfig,
    authorizer: Arc<dyn Authorizer>,
    handler: Option<Arc<dyn PackageHandler>>,
    listener: Option<Listener>,
}

impl Server {
    pub fn new<A: Authorizer>(config: NetworkConfig, authorizer: A) -> Self {
        Self {
            config,
            authorizer: Arc::new(authorizer),
            handler: None,
            listener: None,
        }
    }

    /// Handler registered on every authorized connection
    pub fn with_handler<H: PackageHandler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(Listener::local_addr)
    }

    /// Bind the configured address and start accepting.
    ///
    /// Returns the bound address and the stream of authorized connections.
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn start(&mut self) -> Result<(SocketAddr, mpsc::Receiver<Connection>)> {
        self.config.validate_strict()?;
        if self.listener.is_some() {
            return Err(ProtocolError::Custom("Server already started".into()));
        }

        let (tx, rx) = mpsc::channel(self.config.server.accept_backlog);
        let authorizer = self.authorizer.clone();
        let handler = self.handler.clone();
        let step_timeout = self.config.server.handshake_timeout;

        let mut listener = Listener::new(self.config.transport.clone()).on_accept(move |conn| {
            let authorizer = authorizer.clone();
            let handler = handler.clone();
            let tx = tx.clone();
            async move {
                conn.start_reader();
                let mut handshake = ServerHandshake::new(authorizer, step_timeout);
                if handshake.run(&conn).await.is_err() {
                    return;
                }
                if let Some(handler) = handler {
                    conn.set_handler(handler);
                }
                if let Err(mpsc::error::SendError(conn)) = tx.send(conn).await {
                    warn!(id = conn.id(), "No consumer for authorized connections");
                    conn.close().await;
                } else {
                    debug!("Authorized connection delivered");
                }
            }
        });

        let addr = listener.start(&self.config.server.address).await?;
        self.listener = Some(listener);
        Ok((addr, rx))
    }

    /// Stop accepting new connections
    pub async fn stop(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop().await;
            global_metrics().log_metrics();
        }
    }
}
