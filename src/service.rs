//! Streaming service orchestration.
//!
//! Owns the session lifecycle: bind the listener, wait for one receiver, pump
//! microphone audio into the connected socket, and tear everything down on
//! stop or failure. All termination paths converge on one idempotent cleanup
//! routine.

use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::audio::capture::AudioCapture;
use crate::audio::source::{CaptureBackend, MicBackend};
use crate::config::{Permissions, ServerConfig};
use crate::error::{Error, Result};
use crate::network::listener::{discover_ipv4, StreamListener};
use crate::observer::{LogObserver, StreamObserver};

/// Lifecycle of the one possible streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Binding,
    WaitingForClient,
    Streaming,
    ShuttingDown,
}

/// Handles owned by the in-flight session. Each one is released independently
/// so cleanup can run from any state without double-free.
#[derive(Default)]
struct SessionHandles {
    listener: Option<StreamListener>,
    client: Option<std::net::TcpStream>,
    cancel: Option<watch::Sender<bool>>,
}

struct Inner {
    state: watch::Sender<ServiceState>,
    handles: Mutex<SessionHandles>,
    running: AtomicBool,
    backend: Arc<dyn CaptureBackend>,
    observer: Arc<dyn StreamObserver>,
}

impl Inner {
    fn set_state(&self, next: ServiceState) {
        self.state.send_replace(next);
    }

    /// Canonical cleanup: signal cancellation, shut the client socket down to
    /// unblock a suspended write, drop the listener handle, reset to `Idle`.
    fn cleanup(&self) {
        let mut handles = self.handles.lock();
        if let Some(cancel) = handles.cancel.take() {
            let _ = cancel.send(true);
        }
        if let Some(client) = handles.client.take() {
            let _ = client.shutdown(Shutdown::Both);
        }
        handles.listener.take();
        drop(handles);
        self.set_state(ServiceState::Idle);
        if self.running.swap(false, Ordering::SeqCst) {
            self.observer.running_changed(false, None);
        }
    }
}

/// The streaming orchestrator. Sole writer of [`ServiceState`] and sole owner
/// of the session resources.
pub struct StreamService {
    inner: Arc<Inner>,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl StreamService {
    pub fn new(backend: Arc<dyn CaptureBackend>, observer: Arc<dyn StreamObserver>) -> Self {
        let (state, _) = watch::channel(ServiceState::Idle);
        Self {
            inner: Arc::new(Inner {
                state,
                handles: Mutex::new(SessionHandles::default()),
                running: AtomicBool::new(false),
                backend,
                observer,
            }),
            session: Mutex::new(None),
        }
    }

    /// Service over the default microphone, reporting through the log.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(MicBackend), Arc::new(LogObserver))
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    /// Read-only change notifications for collaborators.
    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.inner.state.subscribe()
    }

    /// Address of the bound listener while a session is up.
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.inner
            .handles
            .lock()
            .listener
            .as_ref()
            .map(StreamListener::local_addr)
    }

    /// Starts a session: bind, then wait in the background for one receiver
    /// and stream until stopped. Any prior session is fully torn down first,
    /// so no state leaks between sessions.
    pub async fn start(&self, config: ServerConfig, grants: Permissions) -> Result<()> {
        self.shutdown_session().await;

        if !grants.all_granted() {
            let err = Error::PermissionDenied(format!(
                "missing grants: {}",
                grants.missing().join(", ")
            ));
            self.inner.observer.stream_failed(&err.to_string());
            return Err(err);
        }

        self.inner.set_state(ServiceState::Binding);
        match self.bind_and_spawn(config).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.inner.observer.stream_failed(&err.to_string());
                self.inner.set_state(ServiceState::ShuttingDown);
                self.inner.cleanup();
                Err(err)
            }
        }
    }

    async fn bind_and_spawn(&self, config: ServerConfig) -> Result<()> {
        let addr = match config.bind_address {
            Some(addr) => addr,
            None => discover_ipv4()?,
        };
        let listener = StreamListener::bind(addr, config.port).await?;
        let local = listener.local_addr();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut handles = self.inner.handles.lock();
            handles.listener = Some(listener.clone());
            handles.cancel = Some(cancel_tx);
        }

        self.inner.set_state(ServiceState::WaitingForClient);
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.observer.running_changed(true, Some(local));
        tracing::info!(%local, "waiting for receiver");

        let handle = tokio::spawn(run_session(self.inner.clone(), listener, cancel_rx));
        *self.session.lock() = Some(handle);
        Ok(())
    }

    /// Cancels any in-flight session and resets to `Idle`. No-op when idle.
    pub async fn stop(&self) {
        self.shutdown_session().await;
    }

    /// Releases whatever the current session holds. Safe to call repeatedly
    /// and concurrently with the session's own error-path cleanup.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Cancels the session task and waits for it to finish, so the previous
    /// session can never tear down the next one's resources.
    async fn shutdown_session(&self) {
        let session = self.session.lock().take();
        if session.is_some() {
            self.inner.set_state(ServiceState::ShuttingDown);
        }
        self.inner.cleanup();
        if let Some(handle) = session {
            let _ = handle.await;
        }
    }
}

/// The session task: accept one receiver, stream until the loop exits, then
/// run the canonical cleanup. Errors surface to the observer; cancellation
/// does not.
async fn run_session(inner: Arc<Inner>, listener: StreamListener, cancel: watch::Receiver<bool>) {
    match drive_session(&inner, listener, cancel).await {
        Ok(()) => tracing::info!("session closed"),
        Err(Error::Cancelled) => tracing::debug!("session cancelled"),
        Err(err) => {
            tracing::error!("session failed: {err}");
            inner.observer.stream_failed(&err.to_string());
        }
    }
    inner.set_state(ServiceState::ShuttingDown);
    inner.cleanup();
}

async fn drive_session(
    inner: &Arc<Inner>,
    listener: StreamListener,
    mut cancel: watch::Receiver<bool>,
) -> Result<()> {
    let stream = tokio::select! {
        _ = cancel.changed() => return Err(Error::Cancelled),
        accepted = listener.accept() => accepted.map_err(Error::StreamIo)?,
    };
    // One accept per session: the listener stays bound but is never polled
    // again, so further connection attempts are not serviced.
    let peer = stream.peer_addr().map_err(Error::StreamIo)?;
    tracing::info!(%peer, "receiver connected");

    let client = stream.into_std().map_err(Error::StreamIo)?;
    client.set_nonblocking(false).map_err(Error::StreamIo)?;
    let sink = client.try_clone().map_err(Error::StreamIo)?;
    inner.handles.lock().client = Some(client);

    inner.set_state(ServiceState::Streaming);

    let backend = Arc::clone(&inner.backend);
    let loop_cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let mut capture = AudioCapture::initialize(backend.as_ref())?;
        let mut sink = sink;
        capture.run(&mut sink, &loop_cancel)
    })
    .await
    .unwrap_or_else(|join_err| Err(Error::StreamIo(std::io::Error::other(join_err))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::ScriptedBackend;

    fn scripted_service() -> StreamService {
        StreamService::new(Arc::new(ScriptedBackend::new()), Arc::new(LogObserver))
    }

    #[tokio::test]
    async fn initial_state_is_idle() {
        assert_eq!(scripted_service().state(), ServiceState::Idle);
    }

    #[tokio::test]
    async fn stop_on_idle_is_a_noop() {
        let service = scripted_service();
        service.stop().await;
        service.stop().await;
        assert_eq!(service.state(), ServiceState::Idle);
        assert!(service.bound_addr().is_none());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_when_idle() {
        let service = scripted_service();
        for _ in 0..3 {
            service.cleanup();
        }
        assert_eq!(service.state(), ServiceState::Idle);
    }
}
