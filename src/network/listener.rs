//! Listening endpoint for the single receiver connection.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::error::BindError;

/// The bound listening endpoint. Clones share one underlying listener; the
/// endpoint closes when the last clone is dropped.
#[derive(Clone)]
pub struct StreamListener {
    inner: Arc<TcpListener>,
    local_addr: SocketAddr,
}

impl StreamListener {
    /// Binds `addr:port` with address reuse enabled and a backlog of one.
    /// A single receiver is accepted per session; queued connection attempts
    /// are never serviced.
    pub async fn bind(addr: Ipv4Addr, port: u16) -> Result<Self, BindError> {
        let requested = SocketAddr::from((addr, port));
        let listener = create_listener(requested).map_err(|source| BindError::Bind {
            addr: requested,
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| BindError::Bind {
            addr: requested,
            source,
        })?;
        tracing::debug!(%local_addr, "listener bound");
        Ok(Self {
            inner: Arc::new(listener),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Suspends until one client connects.
    pub async fn accept(&self) -> io::Result<TcpStream> {
        let (stream, peer) = self.inner.accept().await?;
        tracing::debug!(%peer, "client accepted");
        Ok(stream)
    }
}

fn create_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

/// The host's preferred non-loopback IPv4 address, found by probing the
/// routing table with a connected UDP socket. No packets are sent.
pub fn discover_ipv4() -> Result<Ipv4Addr, BindError> {
    let probe =
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(|_| BindError::NoIpv4Address)?;
    probe
        .connect(("8.8.8.8", 80))
        .map_err(|_| BindError::NoIpv4Address)?;
    match probe.local_addr() {
        Ok(SocketAddr::V4(addr)) if !addr.ip().is_loopback() && !addr.ip().is_unspecified() => {
            Ok(*addr.ip())
        }
        _ => Err(BindError::NoIpv4Address),
    }
}
