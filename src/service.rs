//! Startup and shutdown wiring.
//!
//! Registers the service name for an already opened endpoint, starts the
//! transaction server as its own task, then parks the calling thread until an
//! interrupt arrives. On interrupt the name is unregistered and the server task
//! is dropped with whatever transaction it was in the middle of.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tokio::runtime::Handle;

use crate::directory::{NameDirectory, Registration};
use crate::name::ServiceName;
use crate::server::TransactionServer;
use crate::shutdown::Interrupt;
use crate::sink::Sink;
use crate::transport::Transport;

/// Everything needed to announce and serve.
pub struct Service<T, D> {
    name: ServiceName,
    transport: T,
    directory: D,
    standard_response: String,
    sink: Option<Arc<dyn Sink>>,
}

impl<T, D> fmt::Debug for Service<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("standard_response", &self.standard_response)
            .field("forwarding", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, D> Service<T, D>
where
    T: Transport + 'static,
    D: NameDirectory,
{
    /// Assemble a service around an open endpoint.
    pub fn new(
        name: ServiceName,
        transport: T,
        directory: D,
        standard_response: impl Into<String>,
        sink: Option<Arc<dyn Sink>>,
    ) -> Self {
        Self {
            name,
            transport,
            directory,
            standard_response: standard_response.into(),
            sink,
        }
    }

    /// Register, serve on `runtime` until `interrupt` fires, unregister.
    ///
    /// # Errors
    ///
    /// Returns an error only if registration fails; the server loop is not
    /// started in that case.
    pub fn run(self, runtime: &Handle, interrupt: Interrupt) -> Result<()> {
        let address = self.transport.address();
        let registration = Registration::register(self.directory, self.name, address)?;

        let server = TransactionServer::new(self.transport, self.standard_response, self.sink);
        let serving = runtime.spawn(server.run());

        interrupt.wait();
        log::info!("SIGINT received, quitting...");
        registration.release();
        serving.abort();
        Ok(())
    }
}
