//! Status and failure reporting towards the embedding layer.

use std::net::SocketAddr;

/// Receives user-facing service events. Implementations must be cheap and
/// non-blocking; they are invoked from the service's task context.
pub trait StreamObserver: Send + Sync {
    /// A session or start attempt failed. `message` is human-readable.
    fn stream_failed(&self, message: &str);

    /// Service availability changed. `endpoint` is the bound address while
    /// the service is up.
    fn running_changed(&self, running: bool, endpoint: Option<SocketAddr>);
}

/// Default observer that forwards everything to the log.
pub struct LogObserver;

impl StreamObserver for LogObserver {
    fn stream_failed(&self, message: &str) {
        tracing::error!("{message}");
    }

    fn running_changed(&self, running: bool, endpoint: Option<SocketAddr>) {
        match endpoint {
            Some(addr) if running => tracing::info!(%addr, "streaming service up"),
            _ => tracing::info!("streaming service stopped"),
        }
    }
}
