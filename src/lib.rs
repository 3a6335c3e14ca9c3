//! `udp-file-transfer` — a miniature TCP: reliable, ordered, connection-
//! oriented file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────┐    SYN / data / FIN     ┌───────────────────┐
//!  │  client::Session │────────────────────────▶│  server::Server   │
//!  │  (handshake,     │                         │  (classifier +    │
//!  │   transfer,      │◀────────────────────────│   responder)      │
//!  │   teardown FSM)  │   SYN-ACK / ACK / DUP   └────────┬──────────┘
//!  └────────┬─────────┘                                  │
//!           │                              ┌─────────────▼───────────┐
//!           │                              │ server::ConnectionTable │
//!           │                              │ (id → expected seq,     │
//!           │                              │  last ack sent, file)   │
//!           │                              └─────────────────────────┘
//!           │ segments
//!  ┌────────▼──────┐
//!  │    Socket     │  (thin async wrapper around tokio UdpSocket)
//!  └───────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]  — wire format: 12-byte header codec, segments
//! - [`seq`]     — sequence-space arithmetic (wrap mod 102401)
//! - [`window`]  — congestion-window estimator (slow start / avoidance)
//! - [`state`]   — client session FSM types
//! - [`trace`]   — RECV/SEND/DROP packet trace lines
//! - [`socket`]  — async UDP socket abstraction
//! - [`client`]  — handshake, stop-and-wait transfer loop, teardown
//! - [`server`]  — connection table, packet classifier, file reassembly

pub mod client;
pub mod packet;
pub mod seq;
pub mod server;
pub mod socket;
pub mod state;
pub mod trace;
pub mod window;
