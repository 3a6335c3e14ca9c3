//! Client session finite-state machine (FSM) types.
//!
//! This module defines every state a client [`crate::client::Session`] can
//! occupy across the handshake → transfer → teardown lifecycle.  State
//! transitions are *not* implemented here — they live in [`crate::client`] —
//! but all legal transitions are documented on each variant.
//!
//! The server keeps no per-connection FSM: its behaviour is fully determined
//! by the connection table (see [`crate::server`]).

/// All possible states of the client session FSM.
///
/// ```text
///  Idle ──SYN sent──▶ AwaitingSynAck ──SYN-ACK──▶ Established
///                                                      │
///                                            FIN sent  │
///                                                      ▼
///  Closed ◀── final ACK sent / 2 s window ──── FinWait
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No connection exists; initial state.
    #[default]
    Idle,
    /// SYN has been sent; retransmitting it every poll interval until a
    /// SYN-ACK arrives.  Transitions to `Established` on SYN-ACK.
    AwaitingSynAck,
    /// Handshake complete; file transfer in progress.  Transitions to
    /// `FinWait` once the file is exhausted and FIN is sent.
    Established,
    /// FIN sent; draining replies until the server's FIN arrives or the
    /// teardown window expires.  Transitions to `Closed` either way.
    FinWait,
    /// Session over; no further segments are sent.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
