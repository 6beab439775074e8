mod channel;
mod cli;
mod client;
mod error;
mod packet;
mod server;
mod store;
pub mod transfer;

pub use crate::channel::{Channel, Recv};
pub use crate::cli::{log_level, Cli, ServerCli, TransferMode};
pub use crate::client::{Client, ClientConfig};
pub use crate::error::TransferError;
pub use crate::packet::{ErrorCode, PacketError, TftpPacket};
pub use crate::server::{Server, ServerConfig};
pub use crate::store::{FileSink, Sink, Source};
pub use crate::transfer::{AckRecovery, Endpoint, State, Transfer, TransferOptions};

pub const DEF_BLOCK_SIZE: u16 = 512; // RFC 1350
pub const MAX_PACKET_SIZE: usize = 4 + DEF_BLOCK_SIZE as usize;

pub const DEF_TIMEOUT_MS: u64 = 1000;
pub const MAX_RETRY_COUNT: u8 = 5;
pub const TRANSFER_MODE: &str = "octet";
