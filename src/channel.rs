use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

/// Outcome of a bounded receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recv {
    Datagram { len: usize, from: SocketAddr },
    TimedOut,
}

/// Unreliable, connectionless transport bound to a local endpoint.
///
/// Expiry of the receive window is reported as [`Recv::TimedOut`], never as
/// an error, so the transfer engine can retransmit on it.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<()>;

    async fn recv_timeout(&self, buf: &mut [u8], wait: Duration) -> io::Result<Recv>;
}

#[async_trait]
impl Channel for UdpSocket {
    async fn send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<()> {
        UdpSocket::send_to(self, buf, target).await.map(|_| ())
    }

    async fn recv_timeout(&self, buf: &mut [u8], wait: Duration) -> io::Result<Recv> {
        match timeout(wait, self.recv_from(buf)).await {
            Ok(res) => res.map(|(len, from)| Recv::Datagram { len, from }),
            Err(_) => Ok(Recv::TimedOut),
        }
    }
}
