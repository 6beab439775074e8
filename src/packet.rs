use std::{fmt, io, str};

use thiserror::Error;

use crate::DEF_BLOCK_SIZE;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TftpPacket {
    RRQ { filename: String, mode: String },
    WRQ { filename: String, mode: String },
    DATA { block: u16, data: Vec<u8> },
    ACK(u16),
    ERROR { code: u16, msg: String },
}

/// Structural decode failures.
///
/// `MissingOpcode` means the datagram is too short to even tell what it is;
/// every other variant means the opcode was read but the body is bad.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet too short to carry an opcode ({0} bytes)")]
    MissingOpcode(usize),

    #[error("invalid opcode: {0}")]
    UnknownOpcode(u16),

    #[error("{kind} packet truncated: {len} bytes, header needs 4")]
    Truncated { kind: &'static str, len: usize },

    #[error("missing {0} terminator")]
    MissingTerminator(&'static str),

    #[error("empty filename")]
    EmptyFilename,

    #[error("invalid {0} encoding")]
    InvalidText(&'static str),

    #[error("DATA payload of {0} bytes exceeds block size")]
    Oversized(usize),
}

/// RFC 1350 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NotDefined = 0,
    FileNotFound = 1,
    AccessViolation = 2,
    DiskFull = 3,
    IllegalOperation = 4,
    UnknownTransferId = 5,
    FileAlreadyExists = 6,
    NoSuchUser = 7,
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code as u16
    }
}

impl ErrorCode {
    /// Maps a local file failure to the code reported to the peer.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
            io::ErrorKind::AlreadyExists => ErrorCode::FileAlreadyExists,
            _ => ErrorCode::NotDefined,
        }
    }
}

impl fmt::Display for TftpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TftpPacket::RRQ { filename, mode } => write!(f, "RRQ {filename} ({mode})"),
            TftpPacket::WRQ { filename, mode } => write!(f, "WRQ {filename} ({mode})"),
            TftpPacket::DATA { block, data } => write!(f, "DATA #{block} ({} bytes)", data.len()),
            TftpPacket::ACK(block) => write!(f, "ACK #{block}"),
            TftpPacket::ERROR { code, msg } => write!(f, "ERROR {code}: {msg}"),
        }
    }
}

impl TftpPacket {
    pub fn error(code: ErrorCode, msg: impl Into<String>) -> Self {
        TftpPacket::ERROR {
            code: code.into(),
            msg: msg.into(),
        }
    }

    /// Encodes the packet. Callers guarantee that filename and mode hold no
    /// NUL byte and that a DATA payload fits in one block.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = Vec::with_capacity(4);

        match self {
            TftpPacket::RRQ { filename, mode } | TftpPacket::WRQ { filename, mode } => {
                debug_assert!(!filename.contains('\0') && !mode.contains('\0'));
                let opcode = if let TftpPacket::RRQ { .. } = self {
                    OP_RRQ
                } else {
                    OP_WRQ
                };
                bytes.extend_from_slice(&opcode.to_be_bytes());
                bytes.extend_from_slice(filename.as_bytes());
                bytes.push(0);
                bytes.extend_from_slice(mode.as_bytes());
                bytes.push(0);
            }
            TftpPacket::DATA { block, data } => {
                debug_assert!(data.len() <= usize::from(DEF_BLOCK_SIZE));
                bytes.extend_from_slice(&OP_DATA.to_be_bytes());
                bytes.extend_from_slice(&block.to_be_bytes());
                bytes.extend_from_slice(data);
            }
            TftpPacket::ACK(block) => {
                bytes.extend_from_slice(&OP_ACK.to_be_bytes());
                bytes.extend_from_slice(&block.to_be_bytes());
            }
            TftpPacket::ERROR { code, msg } => {
                bytes.extend_from_slice(&OP_ERROR.to_be_bytes());
                bytes.extend_from_slice(&code.to_be_bytes());
                bytes.extend_from_slice(msg.as_bytes());
                bytes.push(0);
            }
        }
        bytes
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < 2 {
            return Err(PacketError::MissingOpcode(buf.len()));
        }

        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let pkt = match opcode {
            OP_RRQ | OP_WRQ => {
                let (filename, rest) = read_cstr(&buf[2..], "filename")?;
                if filename.is_empty() {
                    return Err(PacketError::EmptyFilename);
                }
                // Anything after the mode is RFC 2347 options, which are not negotiated.
                let (mode, _options) = read_cstr(rest, "mode")?;
                if opcode == OP_RRQ {
                    TftpPacket::RRQ { filename, mode }
                } else {
                    TftpPacket::WRQ { filename, mode }
                }
            }
            OP_DATA => {
                let block = read_block(buf, "DATA")?;
                let data = &buf[4..];
                if data.len() > usize::from(DEF_BLOCK_SIZE) {
                    return Err(PacketError::Oversized(data.len()));
                }
                TftpPacket::DATA {
                    block,
                    data: data.to_vec(),
                }
            }
            OP_ACK => TftpPacket::ACK(read_block(buf, "ACK")?),
            OP_ERROR => {
                let code = read_block(buf, "ERROR")?;
                let body = &buf[4..];
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                let msg = String::from_utf8_lossy(&body[..end]).into_owned();

                TftpPacket::ERROR { code, msg }
            }
            _ => {
                return Err(PacketError::UnknownOpcode(opcode));
            }
        };

        Ok(pkt)
    }
}

// Second 16-bit field of DATA/ACK/ERROR (block number or error code).
fn read_block(buf: &[u8], kind: &'static str) -> Result<u16, PacketError> {
    if buf.len() < 4 {
        return Err(PacketError::Truncated {
            kind,
            len: buf.len(),
        });
    }
    Ok(u16::from_be_bytes([buf[2], buf[3]]))
}

// Reads a NUL-terminated string, returning it and the bytes after the terminator.
fn read_cstr<'a>(buf: &'a [u8], what: &'static str) -> Result<(String, &'a [u8]), PacketError> {
    let pos = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(PacketError::MissingTerminator(what))?;
    let s = str::from_utf8(&buf[..pos])
        .map_err(|_| PacketError::InvalidText(what))?
        .to_string();
    Ok((s, &buf[pos + 1..]))
}
