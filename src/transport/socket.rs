//! Async UDP socket wrapper for H-UDP.
//!
//! One socket carries both channels. The receive loop owns the
//! [`HudpSocket`] (and its receive buffer) while callers write through a
//! cloned [`DatagramSender`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::trace;

use crate::core::{DEFAULT_RECV_BUFFER_SIZE, MAX_DATAGRAM_SIZE};

/// Errors a UDP receive can report that say nothing about the local socket.
///
/// Some platforms surface an ICMP "port unreachable" from an earlier send as
/// a receive error; the socket itself is still usable.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Async UDP socket wrapper for H-UDP.
#[derive(Debug)]
pub struct HudpSocket {
    /// The underlying UDP socket.
    socket: Arc<UdpSocket>,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
}

impl HudpSocket {
    /// Create a socket bound to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        HudpSocketBuilder::new().bind(addr).await
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        HudpSocketBuilder::new().from_socket(socket)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Size of the receive buffer.
    pub fn recv_buffer_size(&self) -> usize {
        self.recv_buffer.len()
    }

    /// Send a datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Receive a datagram and the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        trace!(len, %addr, "datagram received");
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Handle for writing from other tasks.
    pub fn sender(&self) -> DatagramSender {
        DatagramSender {
            socket: Arc::clone(&self.socket),
        }
    }
}

/// Cloneable write half of a [`HudpSocket`].
#[derive(Debug, Clone)]
pub struct DatagramSender {
    socket: Arc<UdpSocket>,
}

impl DatagramSender {
    /// Send a datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        trace!(len = data.len(), %addr, "datagram sent");
        self.socket.send_to(data, addr).await
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Builder for creating H-UDP sockets with custom options.
#[derive(Debug, Clone)]
pub struct HudpSocketBuilder {
    recv_buffer_size: usize,
}

impl Default for HudpSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HudpSocketBuilder {
    /// Create a new socket builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    /// Set the receive buffer size.
    ///
    /// Values below the largest protocol datagram are raised to it.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size.max(MAX_DATAGRAM_SIZE);
        self
    }

    /// Bind to the given address and create a socket.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<HudpSocket> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.from_socket(socket))
    }

    /// Create a socket from an existing UDP socket.
    pub fn from_socket(self, socket: UdpSocket) -> HudpSocket {
        HudpSocket {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; self.recv_buffer_size],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = HudpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = socket.local_addr().unwrap();
        assert!(addr.port() != 0);
        assert_eq!(socket.recv_buffer_size(), DEFAULT_RECV_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_socket_send_recv() {
        let mut server = HudpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = HudpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        let data = b"hello H-UDP";
        client.send_to(data, server_addr).await.unwrap();

        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, data);
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_sender_handle_shares_socket() {
        let mut server = HudpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let server_addr = server.local_addr().unwrap();

        let client = HudpSocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let handle = client.sender();
        assert_eq!(handle.local_addr().unwrap(), client.local_addr().unwrap());

        handle.send_to(b"via handle", server_addr).await.unwrap();
        let (received, from) = server.recv_from().await.unwrap();
        assert_eq!(received, b"via handle");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[test]
    fn test_socket_builder() {
        let builder = HudpSocketBuilder::new().recv_buffer_size(4096);
        assert_eq!(builder.recv_buffer_size, 4096);

        let builder = HudpSocketBuilder::new().recv_buffer_size(16);
        assert_eq!(builder.recv_buffer_size, MAX_DATAGRAM_SIZE);
    }

    #[test]
    fn test_transient_errors() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
