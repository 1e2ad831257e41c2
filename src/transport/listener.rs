use crate::config::TransportConfig;
use crate::error::{ProtocolError, Result};
use crate::transport::connection::Connection;
use futures::future::BoxFuture;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Invoked in its own task for every accepted connection
pub type AcceptCallback = Arc<dyn Fn(Connection) -> BoxFuture<'static, ()> + Send + Sync>;

/// TCP accept loop handing connections to a callback
pub struct Listener {
    config: TransportConfig,
    on_accept: Option<AcceptCallback>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl Listener {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            on_accept: None,
            shutdown_tx: None,
            task: None,
            local_addr: None,
        }
    }

    /// Set the accept callback
    pub fn on_accept<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: AcceptCallback =
            Arc::new(move |conn: Connection| -> BoxFuture<'static, ()> { Box::pin(callback(conn)) });
        self.on_accept = Some(boxed);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Bind and spawn the accept loop. Returns the bound address.
    #[instrument(skip(self))]
    pub async fn start(&mut self, addr: &str) -> Result<SocketAddr> {
        if self.is_running() {
            return Err(ProtocolError::Custom("Listener already running".into()));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        let task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.on_accept.clone(),
            self.config.clone(),
        ));

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        self.local_addr = Some(local_addr);
        info!(address = %local_addr, "Listening");
        Ok(local_addr)
    }

    /// Stop accepting. Already accepted connections stay open.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    on_accept: Option<AcceptCallback>,
    config: TransportConfig,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
                }

                let conn = Connection::from_stream(stream, Some(peer), &config);
                debug!(id = conn.id(), %peer, "Accepted connection");

                match &on_accept {
                    Some(callback) => {
                        tokio::spawn(callback(conn));
                    }
                    None => {
                        warn!(%peer, "No accept callback, closing connection");
                        tokio::spawn(async move { conn.close().await });
                    }
                }
            }
        }
    }
}
