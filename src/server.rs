use std::fs::File;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::channel::Channel;
use crate::packet::{ErrorCode, TftpPacket};
use crate::store::FileSink;
use crate::transfer::{AckRecovery, Transfer, TransferOptions};
use crate::{MAX_PACKET_SIZE, TRANSFER_MODE};

/// TFTP server configuration
///
/// # Example
///
/// ```rust
/// use tftp::ServerConfig;
/// use std::path::PathBuf;
///
/// let config = ServerConfig::new(
///     "127.0.0.1".parse().unwrap(),
///     6969,
///     PathBuf::from("/tmp/tftp"),
///     false,
/// );
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// IP address to listen on
    pub ip_address: IpAddr,
    /// Port number to listen on
    pub port: u16,
    /// Directory files are served from and stored to
    pub directory: PathBuf,
    /// Reject all write requests
    pub read_only: bool,
    /// Retransmission policy for every transfer
    pub options: TransferOptions,
}

impl ServerConfig {
    pub fn new(ip_address: IpAddr, port: u16, directory: PathBuf, read_only: bool) -> Self {
        Self {
            ip_address,
            port,
            directory,
            read_only,
            options: TransferOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }
}

/// Lockstep TFTP server.
///
/// Requests are served one at a time, each to completion, on the listening
/// socket itself.
pub struct Server {
    socket: UdpSocket,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(config.ip_address, config.port)).await?;
        Ok(Self { socket, config })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn serve(&self) -> io::Result<()> {
        loop {
            self.serve_one().await?;
        }
    }

    /// Waits for one request and serves it.
    pub async fn serve_one(&self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let (num, addr) = self.socket.recv_from(&mut buf).await?;

        match TftpPacket::deserialize(&buf[..num]) {
            Ok(TftpPacket::RRQ { filename, mode }) => {
                log::info!("{addr} RRQ {filename} ({mode})");
                self.handle_rrq(addr, &filename, &mode).await;
            }
            Ok(TftpPacket::WRQ { filename, mode }) => {
                log::info!("{addr} WRQ {filename} ({mode})");
                self.handle_wrq(addr, &filename, &mode).await;
            }
            Ok(pkt) => {
                log::debug!("{addr} {pkt} outside of a transfer");
                self.send_error(addr, ErrorCode::IllegalOperation, "Illegal TFTP operation")
                    .await;
            }
            Err(e) => {
                log::debug!("{addr} malformed request: {e}");
                self.send_error(addr, ErrorCode::IllegalOperation, "Illegal TFTP operation")
                    .await;
            }
        }
        Ok(())
    }

    async fn handle_rrq(&self, addr: SocketAddr, filename: &str, mode: &str) {
        let Some(path) = self.prepare(addr, filename, mode).await else {
            return;
        };
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("{addr} cannot open {}: {e}", path.display());
                let msg = match e.kind() {
                    io::ErrorKind::NotFound => "File not found".to_string(),
                    _ => e.to_string(),
                };
                self.send_error(addr, ErrorCode::from_io(&e), msg).await;
                return;
            }
        };

        // A client retransmitting its previous ACK is not a reason to abort.
        let options = self.config.options.with_ignore_stale_acks(true);
        let start = Instant::now();
        let mut transfer = Transfer::new(&self.socket, addr, options).lock_peer();
        match transfer.serve_read(&mut file).await {
            Ok(total) => report(addr, "sent", total, start),
            Err(e) => log::warn!("{addr} RRQ {filename} failed: {e}"),
        }
    }

    async fn handle_wrq(&self, addr: SocketAddr, filename: &str, mode: &str) {
        if self.config.read_only {
            self.send_error(addr, ErrorCode::AccessViolation, "Access violation")
                .await;
            return;
        }
        let Some(path) = self.prepare(addr, filename, mode).await else {
            return;
        };

        // Only a repeated DATA is answered; the client's timer drives recovery.
        let options = self
            .config
            .options
            .with_ack_recovery(AckRecovery::Duplicate);
        let start = Instant::now();
        let mut sink = FileSink::new(&path);
        let mut transfer = Transfer::new(&self.socket, addr, options).lock_peer();
        match transfer.serve_write(&mut sink).await {
            Ok(total) => match sink.commit() {
                Ok(()) => report(addr, "received", total, start),
                Err(e) => log::warn!("{addr} failed to flush {}: {e}", path.display()),
            },
            Err(e) => log::warn!("{addr} WRQ {filename} failed: {e}"),
        }
    }

    // Checks the mode and maps the requested name into the served directory.
    async fn prepare(&self, addr: SocketAddr, filename: &str, mode: &str) -> Option<PathBuf> {
        // Only octet mode is supported
        if !mode.eq_ignore_ascii_case(TRANSFER_MODE) {
            self.send_error(addr, ErrorCode::NotDefined, format!("Unsupported '{mode}' mode"))
                .await;
            return None;
        }
        match resolve(&self.config.directory, filename) {
            Some(path) => Some(path),
            None => {
                self.send_error(addr, ErrorCode::AccessViolation, "Access violation")
                    .await;
                None
            }
        }
    }

    async fn send_error(&self, addr: SocketAddr, code: ErrorCode, msg: impl Into<String>) {
        let pkt = TftpPacket::error(code, msg);
        if let Err(e) = Channel::send_to(&self.socket, &pkt.serialize(), addr).await {
            log::warn!("{addr} failed to send {pkt}: {e}");
        }
    }
}

// Directories in the requested name are dropped; only the final component is served.
fn resolve(directory: &Path, filename: &str) -> Option<PathBuf> {
    let name = Path::new(filename).file_name()?;
    Some(directory.join(name))
}

fn report(addr: SocketAddr, verb: &str, total: u64, start: Instant) {
    let cost = start.elapsed();
    log::info!(
        "{addr} {verb} {total} bytes, cost: {:.3}s, speed: {:.2} MB/s",
        cost.as_secs_f64(),
        total as f64 / cost.as_secs_f64().max(f64::EPSILON) / 1024.0 / 1024.0
    );
}
