//! Server side: connection table, packet classifier and responder.
//!
//! The server is a single-task event loop over one shared UDP socket.  Each
//! inbound datagram is decoded, classified against the process-wide
//! [`ConnectionTable`], and answered (or dropped) before the loop returns to
//! the socket — one datagram at a time, so all mutations of a connection's
//! record are serialised by construction.
//!
//! Classification is pure state manipulation: [`ConnectionTable::process`]
//! takes a header and payload length and returns a [`Verdict`] naming the
//! response to transmit and whether the payload belongs in the connection's
//! output file.  The surrounding [`Server`] owns all socket and file I/O,
//! which keeps the protocol decisions directly testable.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::packet::{Header, Segment, CLIENT_ISN, SERVER_ISN};
use crate::seq::{advance, MAX_SEQ};
use crate::socket::{Socket, SocketError};
use crate::trace::{self, Event};

// ---------------------------------------------------------------------------
// Connection table
// ---------------------------------------------------------------------------

/// Per-connection state, keyed by connection id.
///
/// `last_header_sent` doubles as the retransmission payload for duplicate
/// and out-of-order segments; `next_expected_seq` always mirrors its
/// acknowledgment number.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRecord {
    /// Sequence number the next in-order segment must carry.
    pub next_expected_seq: u32,
    /// The most recently computed acknowledgment header for this connection.
    pub last_header_sent: Header,
}

/// Process-wide mapping of connection id → record.
///
/// Ids start at 1, grow monotonically and are never reused or evicted for
/// the lifetime of the process.
#[derive(Debug)]
pub struct ConnectionTable {
    records: HashMap<u16, ConnectionRecord>,
    next_id: u16,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of classifying one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Known connection but unexpected sequence number: resend the last
    /// acknowledgment header verbatim and discard the packet.
    OutOfOrder { resend: Header },
    /// Fails the validity predicate; dropped silently with no response.
    Invalid,
    /// Accepted connection-request SYN: a fresh id was assigned and the
    /// SYN-ACK reply built.  The caller creates the output file.
    Opened { id: u16, reply: Header },
    /// In-order data or bare ACK.  `reply` is `None` for a bare ACK, which
    /// is terminal for its exchange and must not be answered.
    Accepted {
        id: u16,
        reply: Option<Header>,
        append_payload: bool,
    },
    /// In-order FIN: reply with FIN-ACK.
    Closing { id: u16, reply: Header },
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of connections accepted so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Classify one inbound header and update the table accordingly.
    ///
    /// Priority order: new-connection SYN, then out-of-order detection for
    /// known ids, then validity, then the data/FIN split.  Responses are
    /// produced only for valid, in-order, non-bare-ACK packets.
    pub fn process(&mut self, h: &Header, payload_len: usize) -> Verdict {
        if is_connection_request(h) {
            return self.open(h);
        }

        let Some(record) = self.records.get_mut(&h.connection_id) else {
            // Unassigned id (or a malformed connection request).
            return Verdict::Invalid;
        };

        if h.seq != record.next_expected_seq {
            return Verdict::OutOfOrder {
                resend: record.last_header_sent,
            };
        }

        if h.ack > MAX_SEQ {
            return Verdict::Invalid;
        }

        let id = h.connection_id;
        if h.fin_flag && !h.syn_flag && !h.ack_flag {
            // FIN: acknowledge it and echo a FIN of our own in one header.
            let reply = Header {
                seq: record.last_header_sent.seq,
                ack: advance(h.seq, 1),
                connection_id: id,
                ack_flag: true,
                syn_flag: false,
                fin_flag: true,
            };
            record.last_header_sent = reply;
            record.next_expected_seq = reply.ack;
            Verdict::Closing { id, reply }
        } else if (h.ack_flag && !h.syn_flag && !h.fin_flag)
            || (!h.ack_flag && !h.syn_flag && !h.fin_flag)
        {
            // Data segment or bare ACK.  A flagless segment keeps our
            // previous sequence number; an ACK-flagged one adopts the
            // client's acknowledgment as our sequence number.
            let reply_seq = if h.ack_flag {
                h.ack
            } else {
                record.last_header_sent.seq
            };
            let reply = Header {
                seq: reply_seq,
                ack: advance(h.seq, payload_len as u32),
                connection_id: id,
                ack_flag: true,
                syn_flag: false,
                fin_flag: false,
            };
            record.last_header_sent = reply;
            record.next_expected_seq = reply.ack;

            let bare_ack = h.ack_flag && payload_len == 0;
            Verdict::Accepted {
                id,
                reply: (!bare_ack).then_some(reply),
                append_payload: payload_len > 0,
            }
        } else {
            // SYN on an established connection, FIN+SYN, and every other
            // combination fall outside the three legal packet classes.
            Verdict::Invalid
        }
    }

    fn open(&mut self, h: &Header) -> Verdict {
        let id = self.next_id;
        self.next_id += 1;

        let reply = Header {
            seq: SERVER_ISN,
            ack: advance(h.seq, 1),
            connection_id: id,
            ack_flag: true,
            syn_flag: true,
            fin_flag: false,
        };
        self.records.insert(
            id,
            ConnectionRecord {
                next_expected_seq: reply.ack,
                last_header_sent: reply,
            },
        );
        Verdict::Opened { id, reply }
    }
}

/// A well-formed connection request: SYN alone, no connection yet, and the
/// fixed initial sequence number.
fn is_connection_request(h: &Header) -> bool {
    h.syn_flag
        && !h.ack_flag
        && !h.fin_flag
        && h.connection_id == 0
        && h.seq == CLIENT_ISN
        && h.ack == 0
}

// ---------------------------------------------------------------------------
// Server event loop
// ---------------------------------------------------------------------------

/// Errors that end the server process.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
}

/// The server: one socket, one connection table, one output directory.
pub struct Server {
    socket: Socket,
    table: ConnectionTable,
    file_dir: PathBuf,
}

impl Server {
    /// Bind the listening socket.  The output directory must already exist.
    pub async fn bind(addr: SocketAddr, file_dir: PathBuf) -> Result<Self, ServerError> {
        let socket = Socket::bind(addr).await?;
        log::info!("[server] listening on {}", socket.local_addr);
        Ok(Self {
            socket,
            table: ConnectionTable::new(),
            file_dir,
        })
    }

    /// Address the server is listening on (useful with an OS-assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Receive and answer datagrams until a fatal socket error.
    ///
    /// Undecodable datagrams are discarded; protocol anomalies are handled
    /// per classification and never end the loop.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        loop {
            let (segment, peer) = match self.socket.recv_from().await {
                Ok(v) => v,
                Err(SocketError::Packet(e)) => {
                    log::warn!("[server] discarding undecodable datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            self.handle(segment, peer).await?;
        }
    }

    /// Classify one segment and perform the resulting I/O.
    async fn handle(&mut self, segment: Segment, peer: SocketAddr) -> Result<(), ServerError> {
        let h = segment.header;
        match self.table.process(&h, segment.payload.len()) {
            Verdict::OutOfOrder { resend } => {
                trace::emit(Event::Drop, &h, false);
                self.socket
                    .send_to(&Segment::control(resend), peer)
                    .await?;
                trace::emit(Event::Send, &resend, true);
                log::debug!(
                    "[server] out-of-order seq={} on conn {} (expected {}); re-acked",
                    h.seq,
                    h.connection_id,
                    resend.ack
                );
            }
            Verdict::Invalid => {
                trace::emit(Event::Drop, &h, false);
                log::debug!("[server] invalid packet dropped (conn {})", h.connection_id);
            }
            Verdict::Opened { id, reply } => {
                trace::emit(Event::Recv, &h, false);
                File::create(self.output_path(id)).await?;
                self.socket.send_to(&Segment::control(reply), peer).await?;
                trace::emit(Event::Send, &reply, false);
                log::info!("[server] connection {id} opened by {peer}");
            }
            Verdict::Accepted {
                id,
                reply,
                append_payload,
            } => {
                trace::emit(Event::Recv, &h, false);
                if append_payload {
                    self.append(id, &segment.payload).await?;
                }
                if let Some(reply) = reply {
                    self.socket.send_to(&Segment::control(reply), peer).await?;
                    trace::emit(Event::Send, &reply, false);
                }
            }
            Verdict::Closing { id, reply } => {
                trace::emit(Event::Recv, &h, false);
                self.socket.send_to(&Segment::control(reply), peer).await?;
                trace::emit(Event::Send, &reply, false);
                log::info!("[server] connection {id} closing");
            }
        }
        Ok(())
    }

    /// Append an in-order payload to the connection's output file.
    async fn append(&self, id: u16, payload: &[u8]) -> Result<(), ServerError> {
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.output_path(id))
            .await?;
        file.write_all(payload).await?;
        Ok(())
    }

    fn output_path(&self, id: u16) -> PathBuf {
        self.file_dir.join(format!("{id}.file"))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn syn() -> Header {
        Header {
            seq: CLIENT_ISN,
            ack: 0,
            connection_id: 0,
            ack_flag: false,
            syn_flag: true,
            fin_flag: false,
        }
    }

    fn bare_ack(seq: u32, ack: u32, id: u16) -> Header {
        Header {
            seq,
            ack,
            connection_id: id,
            ack_flag: true,
            syn_flag: false,
            fin_flag: false,
        }
    }

    fn data(seq: u32, id: u16) -> Header {
        Header {
            seq,
            ack: 0,
            connection_id: id,
            ack_flag: false,
            syn_flag: false,
            fin_flag: false,
        }
    }

    fn fin(seq: u32, id: u16) -> Header {
        Header {
            seq,
            ack: 0,
            connection_id: id,
            ack_flag: false,
            syn_flag: false,
            fin_flag: true,
        }
    }

    /// Drive a table through SYN + handshake ACK so data can flow on conn 1.
    fn established_table() -> ConnectionTable {
        let mut table = ConnectionTable::new();
        table.process(&syn(), 0);
        table.process(&bare_ack(12346, 4322, 1), 0);
        table
    }

    #[test]
    fn syn_opens_first_connection() {
        let mut table = ConnectionTable::new();
        let verdict = table.process(&syn(), 0);
        let Verdict::Opened { id, reply } = verdict else {
            panic!("expected Opened, got {verdict:?}");
        };
        assert_eq!(id, 1);
        assert_eq!(reply.seq, SERVER_ISN);
        assert_eq!(reply.ack, 12346);
        assert_eq!(reply.connection_id, 1);
        assert!(reply.syn_flag && reply.ack_flag && !reply.fin_flag);
    }

    #[test]
    fn connection_ids_are_monotonic() {
        let mut table = ConnectionTable::new();
        let Verdict::Opened { id: first, .. } = table.process(&syn(), 0) else {
            panic!("expected Opened");
        };
        let Verdict::Opened { id: second, .. } = table.process(&syn(), 0) else {
            panic!("expected Opened");
        };
        assert_eq!((first, second), (1, 2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn handshake_ack_is_terminal() {
        let mut table = ConnectionTable::new();
        table.process(&syn(), 0);

        let verdict = table.process(&bare_ack(12346, 4322, 1), 0);
        assert_eq!(
            verdict,
            Verdict::Accepted {
                id: 1,
                reply: None,
                append_payload: false,
            }
        );
    }

    #[test]
    fn in_order_data_is_acked_and_appended() {
        let mut table = established_table();

        let verdict = table.process(&data(12346, 1), 512);
        let Verdict::Accepted {
            id,
            reply: Some(reply),
            append_payload,
        } = verdict
        else {
            panic!("expected answered Accepted, got {verdict:?}");
        };
        assert_eq!(id, 1);
        assert!(append_payload);
        assert_eq!(reply.ack, 12858); // 12346 + 512
        assert_eq!(reply.seq, 4322); // flagless data keeps our previous seq
        assert!(reply.ack_flag && !reply.syn_flag && !reply.fin_flag);
    }

    #[test]
    fn duplicate_data_resends_same_ack_and_never_appends() {
        let mut table = established_table();

        let first = table.process(&data(12346, 1), 512);
        let Verdict::Accepted {
            reply: Some(ack_header),
            ..
        } = first
        else {
            panic!("expected answered Accepted");
        };

        // Same (connection, sequence) again: classified out-of-order, the
        // stored acknowledgment is resent verbatim, and no append happens.
        let second = table.process(&data(12346, 1), 512);
        assert_eq!(
            second,
            Verdict::OutOfOrder {
                resend: ack_header
            }
        );

        let third = table.process(&data(12346, 1), 512);
        assert_eq!(
            third,
            Verdict::OutOfOrder {
                resend: ack_header
            }
        );
    }

    #[test]
    fn out_of_order_data_is_never_appended() {
        let mut table = established_table();

        // Expected sequence is 12346; skip ahead instead.
        let verdict = table.process(&data(12900, 1), 512);
        let Verdict::OutOfOrder { resend } = verdict else {
            panic!("expected OutOfOrder, got {verdict:?}");
        };
        assert_eq!(resend.ack, 12346); // still waiting for the gap
    }

    #[test]
    fn unassigned_connection_id_is_invalid() {
        let mut table = ConnectionTable::new();
        table.process(&syn(), 0);
        table.process(&syn(), 0); // two connections assigned

        let verdict = table.process(&data(12346, 5), 512);
        assert_eq!(verdict, Verdict::Invalid);
    }

    #[test]
    fn malformed_connection_request_is_invalid() {
        let mut table = ConnectionTable::new();

        // Wrong initial sequence number.
        let mut bad = syn();
        bad.seq = 99;
        assert_eq!(table.process(&bad, 0), Verdict::Invalid);

        // Nonzero acknowledgment.
        let mut bad = syn();
        bad.ack = 1;
        assert_eq!(table.process(&bad, 0), Verdict::Invalid);

        assert!(table.is_empty());
    }

    #[test]
    fn fin_syn_combination_is_invalid() {
        let mut table = established_table();

        let mut h = fin(12346, 1);
        h.syn_flag = true;
        assert_eq!(table.process(&h, 0), Verdict::Invalid);
    }

    #[test]
    fn syn_on_established_connection_is_invalid() {
        let mut table = established_table();

        let mut h = data(12346, 1);
        h.syn_flag = true;
        assert_eq!(table.process(&h, 0), Verdict::Invalid);
    }

    #[test]
    fn out_of_range_ack_is_invalid() {
        let mut table = established_table();

        let h = bare_ack(12346, MAX_SEQ + 1, 1);
        assert_eq!(table.process(&h, 0), Verdict::Invalid);
    }

    #[test]
    fn in_order_fin_gets_fin_ack() {
        let mut table = established_table();
        table.process(&data(12346, 1), 512);
        table.process(&data(12858, 1), 88);

        let verdict = table.process(&fin(12946, 1), 0);
        let Verdict::Closing { id, reply } = verdict else {
            panic!("expected Closing, got {verdict:?}");
        };
        assert_eq!(id, 1);
        assert_eq!(reply.ack, 12947); // FIN consumes one sequence number
        assert_eq!(reply.seq, 4322);
        assert!(reply.fin_flag && reply.ack_flag && !reply.syn_flag);
    }

    #[test]
    fn fin_out_of_order_triggers_resend() {
        let mut table = established_table();

        let verdict = table.process(&fin(99_999, 1), 0);
        assert!(matches!(verdict, Verdict::OutOfOrder { .. }));
    }

    #[test]
    fn ack_flagged_data_adopts_client_ack_as_seq() {
        let mut table = established_table();

        let h = bare_ack(12346, 4322, 1);
        let verdict = table.process(&h, 100);
        let Verdict::Accepted {
            reply: Some(reply), ..
        } = verdict
        else {
            panic!("expected answered Accepted");
        };
        assert_eq!(reply.seq, 4322); // taken from the client's ack field
        assert_eq!(reply.ack, 12446); // 12346 + 100
    }

    #[test]
    fn acknowledgment_wraps_at_sequence_space_boundary() {
        let mut table = established_table();

        // Force the record to the edge of the sequence space.
        let record = table.records.get_mut(&1).unwrap();
        record.next_expected_seq = 102_300;
        record.last_header_sent.ack = 102_300;

        let verdict = table.process(&data(102_300, 1), 512);
        let Verdict::Accepted {
            reply: Some(reply), ..
        } = verdict
        else {
            panic!("expected answered Accepted");
        };
        assert_eq!(reply.ack, 411); // (102300 + 512) mod 102401
        assert!(reply.ack <= MAX_SEQ);
    }

    #[test]
    fn full_exchange_matches_expected_headers() {
        // SYN → SYN-ACK → ACK → 512 B → 88 B → FIN → FIN-ACK → final ACK.
        let mut table = ConnectionTable::new();

        let Verdict::Opened { reply: syn_ack, .. } = table.process(&syn(), 0) else {
            panic!("expected Opened");
        };
        assert_eq!((syn_ack.seq, syn_ack.ack), (4321, 12346));

        table.process(&bare_ack(12346, 4322, 1), 0);

        let Verdict::Accepted {
            reply: Some(a1), ..
        } = table.process(&data(12346, 1), 512)
        else {
            panic!("expected answered Accepted");
        };
        assert_eq!((a1.seq, a1.ack), (4322, 12858));

        let Verdict::Accepted {
            reply: Some(a2), ..
        } = table.process(&data(12858, 1), 88)
        else {
            panic!("expected answered Accepted");
        };
        assert_eq!((a2.seq, a2.ack), (4322, 12946));

        let Verdict::Closing { reply: fin_ack, .. } = table.process(&fin(12946, 1), 0) else {
            panic!("expected Closing");
        };
        assert_eq!((fin_ack.seq, fin_ack.ack), (4322, 12947));

        // Client's final ACK needs no reply.
        let last = table.process(&bare_ack(12947, 4323, 1), 0);
        assert_eq!(
            last,
            Verdict::Accepted {
                id: 1,
                reply: None,
                append_payload: false,
            }
        );
    }
}
