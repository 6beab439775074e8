use std::fs::File;
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::UdpSocket;
use tokio::time::Duration;

use crate::error::TransferError;
use crate::store::FileSink;
use crate::transfer::{self, Endpoint, TransferOptions};

/// TFTP client configuration
///
/// # Example
///
/// ```rust
/// use tftp::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new("192.168.1.100:69".parse().unwrap())
///     .with_timeout(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    /// Server endpoint every request is sent to
    pub server: SocketAddr,
    /// Retransmission and endpoint policy
    pub options: TransferOptions,
}

impl ClientConfig {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            options: TransferOptions::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_timeout(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.options = self.options.with_max_retries(max_retries);
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.options = self.options.with_endpoint(endpoint);
        self
    }
}

/// Single-shot TFTP client: one socket and one session per call.
pub struct Client {
    config: ClientConfig,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Download `remote_file` into `local_file`, returning the bytes received.
    ///
    /// On failure no partial file is left behind.
    pub async fn get(&self, remote_file: &str, local_file: &Path) -> Result<u64, TransferError> {
        log::info!("Downloading {} to {}", remote_file, local_file.display());

        let socket = self.bind().await?;
        let mut sink = FileSink::new(local_file);
        let total = transfer::read(
            &socket,
            self.config.server,
            remote_file,
            self.config.options,
            &mut sink,
        )
        .await?;
        sink.commit().map_err(TransferError::Store)?;

        log::info!("Download complete: {} ({} bytes)", local_file.display(), total);
        Ok(total)
    }

    /// Upload `local_file` as `remote_file`, returning the bytes sent.
    ///
    /// The local file is opened before any packet is sent.
    pub async fn put(&self, local_file: &Path, remote_file: &str) -> Result<u64, TransferError> {
        log::info!("Uploading {} to {}", local_file.display(), remote_file);

        let mut file = File::open(local_file).map_err(TransferError::Store)?;
        let socket = self.bind().await?;
        let total = transfer::write(
            &socket,
            self.config.server,
            remote_file,
            self.config.options,
            &mut file,
        )
        .await?;

        log::info!("Upload complete: {} ({} bytes)", remote_file, total);
        Ok(total)
    }

    // Ephemeral local port in the server's address family.
    async fn bind(&self) -> Result<UdpSocket, TransferError> {
        let local = if self.config.server.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(TransferError::Transport)?;
        log::debug!(
            "Bound {} for server {}",
            socket.local_addr().map_err(TransferError::Transport)?,
            self.config.server
        );
        Ok(socket)
    }
}
