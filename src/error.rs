use std::io;
use thiserror::Error;

use crate::packet::PacketError;

/// Every variant ends the current session; none are retried beyond the
/// retransmission of the in-flight packet.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("malformed packet: {0}")]
    Malformed(#[from] PacketError),

    #[error("unexpected packet: expected {expected}, got {received}")]
    UnexpectedPacket { expected: String, received: String },

    #[error("server error {code}: {message}")]
    Peer { code: u16, message: String },

    #[error("timed out waiting for reply to block {block} after {attempts} attempts")]
    Timeout { block: u16, attempts: u32 },

    #[error("local file error: {0}")]
    Store(#[source] io::Error),

    #[error("transport error: {0}")]
    Transport(#[source] io::Error),
}
