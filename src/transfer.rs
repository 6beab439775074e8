use log::{debug, trace, warn};
use std::net::SocketAddr;
use tokio::time::{Duration, Instant};

use crate::channel::{Channel, Recv};
use crate::error::TransferError;
use crate::packet::{ErrorCode, TftpPacket};
use crate::store::{Sink, Source};
use crate::{DEF_BLOCK_SIZE, DEF_TIMEOUT_MS, MAX_PACKET_SIZE, MAX_RETRY_COUNT, TRANSFER_MODE};

/// Which remote endpoint replies go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    /// Always send to the endpoint the session was started with and accept
    /// replies from any source.
    #[default]
    Fixed,
    /// Adopt the source of the first reply (a server answering from its own
    /// transfer port) and ignore datagrams from anywhere else afterwards.
    Learn,
}

/// How the receiving side of a session recovers when one of its ACKs is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckRecovery {
    /// Retransmit the last ACK whenever the reply window closes. Duplicate
    /// DATA is dropped without an answer.
    #[default]
    Timer,
    /// Stay quiet on timeout and answer a repeated DATA with the ACK for it,
    /// so the sender's timer alone drives recovery. After the final block the
    /// receiver lingers to answer a repeated last DATA.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// Reply window armed after every send
    pub timeout: Duration,
    /// Retransmissions of one packet before giving up
    pub max_retries: u8,
    pub endpoint: Endpoint,
    /// Skip a repeated ACK for the previous block while awaiting the ACK for
    /// the current one, instead of failing the session
    pub ignore_stale_acks: bool,
    pub ack_recovery: AckRecovery,
}

impl TransferOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_ignore_stale_acks(mut self, ignore: bool) -> Self {
        self.ignore_stale_acks = ignore;
        self
    }

    pub fn with_ack_recovery(mut self, recovery: AckRecovery) -> Self {
        self.ack_recovery = recovery;
        self
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEF_TIMEOUT_MS),
            max_retries: MAX_RETRY_COUNT,
            endpoint: Endpoint::Fixed,
            ignore_stale_acks: false,
            ack_recovery: AckRecovery::Timer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    RequestSent,
    Transferring,
    Complete,
    Failed,
}

/// One transfer session. Not reusable: create a new one per file.
pub struct Transfer<'a, C: Channel + ?Sized> {
    channel: &'a C,
    peer: SocketAddr,
    peer_locked: bool,
    serving: bool,
    options: TransferOptions,
    state: State,
    // Block number carried by the last packet sent (0 for requests and ACK 0).
    block: u16,
    last_sent: Vec<u8>,
    deadline: Instant,
    retries: u8,
    // Cleared while receiving under `AckRecovery::Duplicate`.
    resend_on_timeout: bool,
    buf: Vec<u8>,
}

/// Fetches `filename` from `peer` into `sink`, returning the bytes received.
pub async fn read<C, S>(
    channel: &C,
    peer: SocketAddr,
    filename: &str,
    options: TransferOptions,
    sink: &mut S,
) -> Result<u64, TransferError>
where
    C: Channel + ?Sized,
    S: Sink,
{
    Transfer::new(channel, peer, options).read(filename, sink).await
}

/// Stores the contents of `source` as `filename` on `peer`, returning the
/// bytes sent.
pub async fn write<C, R>(
    channel: &C,
    peer: SocketAddr,
    filename: &str,
    options: TransferOptions,
    source: &mut R,
) -> Result<u64, TransferError>
where
    C: Channel + ?Sized,
    R: Source,
{
    Transfer::new(channel, peer, options).write(filename, source).await
}

impl<'a, C: Channel + ?Sized> Transfer<'a, C> {
    pub fn new(channel: &'a C, peer: SocketAddr, options: TransferOptions) -> Self {
        Self {
            channel,
            peer,
            peer_locked: false,
            serving: false,
            options,
            state: State::Idle,
            block: 0,
            last_sent: Vec::new(),
            deadline: Instant::now(),
            retries: 0,
            resend_on_timeout: true,
            // One spare byte so an oversized DATA is detected instead of truncated.
            buf: vec![0; MAX_PACKET_SIZE + 1],
        }
    }

    /// Accepts datagrams from `peer` only, for a session whose peer endpoint
    /// is already known (the serving side).
    pub fn lock_peer(mut self) -> Self {
        self.peer_locked = true;
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read transfer: RRQ, then receive DATA blocks into `sink`.
    pub async fn read<S: Sink>(&mut self, filename: &str, sink: &mut S) -> Result<u64, TransferError> {
        let res = self.run_read(filename, sink).await;
        self.settle(res).await
    }

    /// Write transfer: WRQ, wait for ACK 0, then send `source` as DATA blocks.
    pub async fn write<R: Source>(
        &mut self,
        filename: &str,
        source: &mut R,
    ) -> Result<u64, TransferError> {
        let res = self.run_write(filename, source).await;
        self.settle(res).await
    }

    /// Serving side of a read request: send `source` starting at block 1.
    pub async fn serve_read<R: Source>(&mut self, source: &mut R) -> Result<u64, TransferError> {
        self.serving = true;
        self.state = State::RequestSent;
        let res = self.send_blocks(source).await;
        self.settle(res).await
    }

    /// Serving side of a write request: ACK 0, then receive into `sink`.
    pub async fn serve_write<S: Sink>(&mut self, sink: &mut S) -> Result<u64, TransferError> {
        self.serving = true;
        let res = self.run_serve_write(sink).await;
        self.settle(res).await
    }

    async fn run_read<S: Sink>(&mut self, filename: &str, sink: &mut S) -> Result<u64, TransferError> {
        self.transmit(TftpPacket::RRQ {
            filename: filename.to_string(),
            mode: TRANSFER_MODE.to_string(),
        })
        .await?;
        self.state = State::RequestSent;
        self.receive_blocks(sink).await
    }

    async fn run_write<R: Source>(
        &mut self,
        filename: &str,
        source: &mut R,
    ) -> Result<u64, TransferError> {
        self.transmit(TftpPacket::WRQ {
            filename: filename.to_string(),
            mode: TRANSFER_MODE.to_string(),
        })
        .await?;
        self.state = State::RequestSent;
        self.await_initial_ack().await?;
        self.send_blocks(source).await
    }

    async fn run_serve_write<S: Sink>(&mut self, sink: &mut S) -> Result<u64, TransferError> {
        self.transmit(TftpPacket::ACK(0)).await?;
        self.state = State::RequestSent;
        self.receive_blocks(sink).await
    }

    // Anything but ACK 0 or ERROR is skipped while the write request is pending.
    async fn await_initial_ack(&mut self) -> Result<(), TransferError> {
        loop {
            match self.next_packet().await {
                Ok(TftpPacket::ACK(0)) => {
                    debug!("Initial ACK received");
                    return Ok(());
                }
                Ok(TftpPacket::ERROR { code, msg }) => return Err(peer_error(code, msg)),
                Ok(other) => debug!("Waiting for ACK #0, ignoring {other}"),
                Err(TransferError::Malformed(e)) => {
                    debug!("Waiting for ACK #0, ignoring malformed packet: {e}")
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn receive_blocks<S: Sink>(&mut self, sink: &mut S) -> Result<u64, TransferError> {
        let mut expected: u16 = 1;
        let mut total: u64 = 0;
        let reack = self.options.ack_recovery == AckRecovery::Duplicate;
        self.resend_on_timeout = !reack;

        loop {
            match self.next_packet().await? {
                TftpPacket::DATA { block, data } if block == expected => {
                    sink.append(&data).map_err(TransferError::Store)?;
                    total += data.len() as u64;

                    self.block = block;
                    self.transmit(TftpPacket::ACK(block)).await?;
                    trace!("Received block {block} ({} bytes)", data.len());

                    // If data is less than block size, transfer is complete
                    if data.len() < usize::from(DEF_BLOCK_SIZE) {
                        debug!("Transfer complete. Total bytes: {total}");
                        if reack {
                            self.dally().await;
                        }
                        return Ok(total);
                    }

                    self.state = State::Transferring;
                    expected = expected.wrapping_add(1);
                }
                TftpPacket::DATA { block, .. } if self.state == State::Transferring => {
                    if reack && block == self.block {
                        debug!("Block {block} repeated, acknowledging again");
                        self.send_last().await?;
                    } else {
                        debug!("Ignoring block {block}, expected {expected}");
                    }
                }
                TftpPacket::WRQ { .. } if self.serving && self.state == State::RequestSent => {
                    debug!("Write request repeated, sending ACK #0 again");
                    self.send_last().await?;
                }
                TftpPacket::ERROR { code, msg } => return Err(peer_error(code, msg)),
                other => return Err(unexpected(format!("DATA #{expected}"), &other)),
            }
        }
    }

    async fn send_blocks<R: Source>(&mut self, source: &mut R) -> Result<u64, TransferError> {
        let block_size = usize::from(DEF_BLOCK_SIZE);
        let mut chunk = vec![0u8; block_size];
        let mut block: u16 = 1;
        let mut total: u64 = 0;

        loop {
            // A short (possibly empty) chunk is the final block.
            let size = source.read_block(&mut chunk).map_err(TransferError::Store)?;

            self.block = block;
            self.transmit(TftpPacket::DATA {
                block,
                data: chunk[..size].to_vec(),
            })
            .await?;
            self.state = State::Transferring;
            trace!("Block {block} sent ({size} bytes), waiting for ACK");

            loop {
                match self.next_packet().await? {
                    TftpPacket::ACK(ack) if ack == block => {
                        trace!("Valid ACK for block {ack}");
                        break;
                    }
                    TftpPacket::ACK(ack)
                        if self.options.ignore_stale_acks && ack == block.wrapping_sub(1) =>
                    {
                        debug!("Ignoring repeated ACK #{ack}");
                    }
                    TftpPacket::ERROR { code, msg } => return Err(peer_error(code, msg)),
                    other => return Err(unexpected(format!("ACK #{block}"), &other)),
                }
            }

            total += size as u64;
            if size < block_size {
                debug!("Transfer complete. Total bytes: {total}");
                return Ok(total);
            }
            block = block.wrapping_add(1);
        }
    }

    async fn transmit(&mut self, pkt: TftpPacket) -> Result<(), TransferError> {
        trace!("-> {} {pkt}", self.peer);
        self.last_sent = pkt.serialize();
        self.retries = 0;
        self.send_last().await
    }

    async fn send_last(&mut self) -> Result<(), TransferError> {
        self.channel
            .send_to(&self.last_sent, self.peer)
            .await
            .map_err(TransferError::Transport)?;
        self.deadline = Instant::now() + self.options.timeout;
        Ok(())
    }

    /// Waits for the next datagram from the peer, retransmitting the last
    /// packet whenever the reply window closes. Skipped datagrams do not
    /// extend the window.
    async fn next_packet(&mut self) -> Result<TftpPacket, TransferError> {
        loop {
            let now = Instant::now();
            if now >= self.deadline {
                self.expire().await?;
                continue;
            }
            let recv = self
                .channel
                .recv_timeout(&mut self.buf, self.deadline - now)
                .await
                .map_err(TransferError::Transport)?;

            let (len, from) = match recv {
                Recv::Datagram { len, from } => (len, from),
                Recv::TimedOut => {
                    self.expire().await?;
                    continue;
                }
            };

            if self.peer_locked && from != self.peer {
                warn!("Ignoring datagram from unknown endpoint {from}");
                continue;
            }

            let pkt = TftpPacket::deserialize(&self.buf[..len])?;
            if self.options.endpoint == Endpoint::Learn && !self.peer_locked {
                if from != self.peer {
                    debug!("Peer answered from {from}, following it");
                }
                self.peer = from;
                self.peer_locked = true;
            }
            trace!("<- {from} {pkt}");
            return Ok(pkt);
        }
    }

    // The reply window closed: retransmit, or give up once the cap is spent.
    async fn expire(&mut self) -> Result<(), TransferError> {
        if self.retries >= self.options.max_retries {
            return Err(TransferError::Timeout {
                block: self.block,
                attempts: u32::from(self.retries) + 1,
            });
        }
        self.retries += 1;
        if !self.resend_on_timeout {
            debug!(
                "No reply after block {}, still waiting ({}/{})",
                self.block, self.retries, self.options.max_retries
            );
            self.deadline = Instant::now() + self.options.timeout;
            return Ok(());
        }
        warn!(
            "Timeout waiting for reply to block {}, retrying ({}/{})",
            self.block, self.retries, self.options.max_retries
        );
        self.send_last().await
    }

    /// Lingers after the final ACK so a sender that missed it can be
    /// answered. The session's data is already complete, so failures here
    /// are only logged.
    async fn dally(&mut self) {
        let mut until = Instant::now() + self.options.timeout * 2;
        loop {
            let now = Instant::now();
            if now >= until {
                return;
            }
            let (len, from) = match self.channel.recv_timeout(&mut self.buf, until - now).await {
                Ok(Recv::Datagram { len, from }) => (len, from),
                Ok(Recv::TimedOut) => return,
                Err(e) => {
                    debug!("Stopped waiting after final block: {e}");
                    return;
                }
            };
            if from != self.peer {
                continue;
            }
            match TftpPacket::deserialize(&self.buf[..len]) {
                Ok(TftpPacket::DATA { block, .. }) if block == self.block => {
                    debug!("Final block {block} repeated, acknowledging again");
                    if let Err(e) = self.send_last().await {
                        debug!("Failed to repeat final ACK: {e}");
                        return;
                    }
                    until = Instant::now() + self.options.timeout * 2;
                }
                Ok(pkt) => debug!("Ignoring {pkt} after final block"),
                Err(e) => debug!("Ignoring malformed packet after final block: {e}"),
            }
        }
    }

    // Records the terminal state and tells the peer why a session is being
    // abandoned when the reason is local.
    async fn settle(&mut self, res: Result<u64, TransferError>) -> Result<u64, TransferError> {
        let err = match res {
            Ok(total) => {
                self.state = State::Complete;
                return Ok(total);
            }
            Err(err) => err,
        };
        self.state = State::Failed;

        let code = match &err {
            TransferError::Malformed(_) | TransferError::UnexpectedPacket { .. } => {
                Some(ErrorCode::IllegalOperation)
            }
            TransferError::Store(e) => Some(ErrorCode::from_io(e)),
            _ => None,
        };
        if let Some(code) = code {
            let notice = TftpPacket::error(code, err.to_string());
            if let Err(e) = self.channel.send_to(&notice.serialize(), self.peer).await {
                debug!("Failed to send error to {}: {e}", self.peer);
            }
        }
        Err(err)
    }
}

fn peer_error(code: u16, message: String) -> TransferError {
    TransferError::Peer { code, message }
}

fn unexpected(expected: String, received: &TftpPacket) -> TransferError {
    TransferError::UnexpectedPacket {
        expected,
        received: received.to_string(),
    }
}
