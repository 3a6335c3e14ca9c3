//! Client side: handshake, transfer loop and teardown.
//!
//! A [`Session`] owns the complete state for one file transfer:
//! - [`Session::establish`] — drive the three-way handshake
//!   (`Idle → AwaitingSynAck → Established`), retransmitting the SYN every
//!   poll interval until the server's SYN-ACK arrives.
//! - [`Session::transfer`] — stream the file in ≤512-byte segments,
//!   stop-and-wait, growing the congestion-window estimate on every
//!   acknowledgment.
//! - [`Session::teardown`] — send FIN and drain replies until the server's
//!   FIN arrives or the teardown window expires (best-effort close).
//!
//! All waits are bounded; the only fatal liveness condition is ten seconds
//! of transfer time without any acknowledgment.

use std::net::SocketAddr;
use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::{timeout_at, Duration, Instant};

use crate::packet::{Header, Segment, CLIENT_ISN, MAX_PAYLOAD};
use crate::seq::advance;
use crate::socket::{Socket, SocketError};
use crate::state::SessionState;
use crate::trace::{self, Event};
use crate::window::CongestionWindow;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bounded wait applied to every individual reply poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transfer aborts fatally after this long without an acknowledgment.
pub const TRANSFER_IDLE_LIMIT: Duration = Duration::from_secs(10);

/// Total time spent waiting for the server's FIN during teardown.
pub const TEARDOWN_WINDOW: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that end the client process.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    #[error("operation not legal in session state {0}")]
    BadState(SessionState),
    #[error("no acknowledgment from the server for 10 seconds; aborting")]
    IdleTimeout,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One client run: a socket, the peer address, and the protocol state that
/// survives from handshake through teardown.
pub struct Session {
    socket: Socket,
    server: SocketAddr,
    /// Current FSM state.
    pub state: SessionState,
    /// Connection id adopted from the server's SYN-ACK; 0 until established.
    pub connection_id: u16,
    /// Congestion-window estimate (reported, never gating).
    pub window: CongestionWindow,
    /// Most recently received peer header; its acknowledgment number frames
    /// every subsequent send.
    last_peer: Header,
}

impl Session {
    pub fn new(socket: Socket, server: SocketAddr) -> Self {
        Self {
            socket,
            server,
            state: SessionState::Idle,
            connection_id: 0,
            window: CongestionWindow::new(),
            last_peer: Header::default(),
        }
    }

    /// Drive the three-way handshake to `Established`.
    ///
    /// The SYN is resent (marked DUP in the trace) on every poll expiry with
    /// no retry cap; anything that is not a SYN-ACK is discarded while
    /// waiting.
    pub async fn establish(&mut self) -> Result<(), ClientError> {
        if self.state != SessionState::Idle {
            return Err(ClientError::BadState(self.state));
        }

        let syn = Header {
            seq: CLIENT_ISN,
            syn_flag: true,
            ..Header::default()
        };
        self.state = SessionState::AwaitingSynAck;
        self.send(&syn, false).await?;

        loop {
            match self.recv_until(Instant::now() + POLL_INTERVAL).await? {
                None => self.send(&syn, true).await?,
                Some(h) if h.syn_flag && h.ack_flag && !h.fin_flag => {
                    trace::emit(Event::Recv, &h, false);
                    self.connection_id = h.connection_id;
                    self.last_peer = h;
                    self.state = SessionState::Established;
                    log::info!("[client] connection {} established", self.connection_id);

                    // Complete the handshake; the server does not confirm
                    // this packet.
                    let ack = Header {
                        seq: h.ack,
                        ack: advance(h.seq, 1),
                        connection_id: self.connection_id,
                        ack_flag: true,
                        ..Header::default()
                    };
                    self.send(&ack, false).await?;
                    return Ok(());
                }
                Some(h) => trace::emit(Event::Drop, &h, false),
            }
        }
    }

    /// Stream the file at `path` to the server in ≤512-byte segments.
    ///
    /// Stop-and-wait: one segment, one bounded reply poll.  A poll expiry
    /// moves on to the next chunk without retransmitting — the window
    /// estimator and acknowledgment state simply do not advance.  Ten
    /// seconds without any acknowledgment aborts the transfer.
    pub async fn transfer(&mut self, path: &Path) -> Result<(), ClientError> {
        if self.state != SessionState::Established {
            return Err(ClientError::BadState(self.state));
        }

        let mut file = File::open(path).await?;
        let mut chunk = vec![0u8; MAX_PAYLOAD];
        let mut last_ack_at = Instant::now();

        loop {
            if last_ack_at.elapsed() >= TRANSFER_IDLE_LIMIT {
                return Err(ClientError::IdleTimeout);
            }

            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break; // end of data
            }

            let header = Header {
                seq: self.last_peer.ack,
                connection_id: self.connection_id,
                ..Header::default()
            };
            self.socket
                .send_to(&Segment::new(header, chunk[..n].to_vec()), self.server)
                .await?;
            trace::emit(Event::Send, &header, false);
            log::debug!(
                "[client] sent {n} byte(s) seq={} cwnd={} ssthresh={}",
                header.seq,
                self.window.cwnd,
                self.window.ssthresh
            );

            if let Some(h) = self.recv_until(Instant::now() + POLL_INTERVAL).await? {
                trace::emit(Event::Recv, &h, false);
                self.last_peer = h;
                self.window.on_ack();
                last_ack_at = Instant::now();
            }
        }
        Ok(())
    }

    /// Send FIN and wait (briefly) for the server's FIN to acknowledge.
    ///
    /// Replies without FIN are dropped.  The first FIN-flagged reply gets
    /// the final ACK; if the teardown window closes without one the session
    /// still ends successfully.
    pub async fn teardown(&mut self) -> Result<(), ClientError> {
        if self.state != SessionState::Established {
            return Err(ClientError::BadState(self.state));
        }

        let fin = Header {
            seq: self.last_peer.ack,
            connection_id: self.connection_id,
            fin_flag: true,
            ..Header::default()
        };
        self.send(&fin, false).await?;
        self.state = SessionState::FinWait;

        let deadline = Instant::now() + TEARDOWN_WINDOW;
        while let Some(h) = self.recv_until(deadline).await? {
            if h.fin_flag {
                trace::emit(Event::Recv, &h, false);
                let ack = Header {
                    seq: h.ack,
                    ack: advance(h.seq, 1),
                    connection_id: self.connection_id,
                    ack_flag: true,
                    ..Header::default()
                };
                self.send(&ack, false).await?;
                break;
            }
            trace::emit(Event::Drop, &h, false);
        }

        // Reaching the deadline without a FIN is a best-effort close, not an
        // error.
        self.state = SessionState::Closed;
        log::info!("[client] session closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Transmit a control header and trace it.
    async fn send(&self, header: &Header, duplicate: bool) -> Result<(), ClientError> {
        self.socket
            .send_to(&Segment::control(*header), self.server)
            .await?;
        trace::emit(Event::Send, header, duplicate);
        Ok(())
    }

    /// Wait for the next datagram from the server until `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline passes.  Datagrams from other
    /// peers and undecodable datagrams are discarded without ending the
    /// wait.
    async fn recv_until(&self, deadline: Instant) -> Result<Option<Header>, ClientError> {
        loop {
            match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok((segment, addr))) => {
                    if addr != self.server {
                        continue;
                    }
                    return Ok(Some(segment.header));
                }
                Ok(Err(SocketError::Packet(e))) => {
                    log::warn!("[client] discarding undecodable datagram: {e}");
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level driver
// ---------------------------------------------------------------------------

/// Stream the file at `path` to `server`: handshake, transfer, teardown.
pub async fn run(server: SocketAddr, path: &Path) -> Result<(), ClientError> {
    let socket = Socket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    let mut session = Session::new(socket, server);
    session.establish().await?;
    session.transfer(path).await?;
    session.teardown().await?;
    Ok(())
}
