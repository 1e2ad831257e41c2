use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Command, CommandBody, Package};
use crate::transport::connection::{Connection, PackageHandler};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::trace;

type HandlerFn =
    dyn Fn(&Connection, &Package) -> Result<Option<CommandBody>> + Send + Sync + 'static;

/// Routes unsolicited packages to a handler per command.
///
/// Heartbeats without a registered handler are accepted silently; any other
/// unrouted command is an `UnexpectedMessage` error.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Command, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, command: Command, handler: F) -> Result<()>
    where
        F: Fn(&Connection, &Package) -> Result<Option<CommandBody>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom("Failed to acquire write lock on dispatcher".to_string())
        })?;

        handlers.insert(command, Box::new(handler));
        Ok(())
    }

    pub fn unregister(&self, command: Command) -> Result<bool> {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom("Failed to acquire write lock on dispatcher".to_string())
        })?;

        Ok(handlers.remove(&command).is_some())
    }

    pub fn dispatch(&self, conn: &Connection, package: &Package) -> Result<Option<CommandBody>> {
        let handlers = self.handlers.read().map_err(|_| {
            ProtocolError::Custom("Failed to acquire read lock on dispatcher".to_string())
        })?;

        match handlers.get(&package.command) {
            Some(handler) => handler(conn, package),
            None if package.command == Command::Heartbeat => {
                trace!(seq = package.seq, "Heartbeat");
                Ok(None)
            }
            None => Err(ProtocolError::UnexpectedMessage),
        }
    }
}

impl PackageHandler for Dispatcher {
    fn handle(&self, conn: &Connection, package: Package) -> Result<Option<CommandBody>> {
        self.dispatch(conn, &package)
    }
}
