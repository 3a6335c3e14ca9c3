//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`]: a fixed 12-byte
//! [`Header`] followed by up to [`MAX_PAYLOAD`] bytes of file data.  This
//! module is responsible for:
//! - Defining the on-wire binary layout (header fields, flag bits, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`].
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Connection ID         |         (zero)          |A|S|F|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The ACK, SYN and FIN flags occupy bits 2, 1 and 0 of the final header
//! byte; the thirteen bits above them are always transmitted as zero and
//! ignored on receipt.
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! seq(4) + ack(4) + connection id(2) + flags(2)

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Maximum number of file-payload bytes carried by one segment.
pub const MAX_PAYLOAD: usize = 512;

/// Largest possible datagram: header plus a full payload.
pub const MAX_DATAGRAM: usize = HEADER_LEN + MAX_PAYLOAD;

/// Initial sequence number a client places in its connection-request SYN.
pub const CLIENT_ISN: u32 = 12345;

/// Initial sequence number the server places in its SYN-ACK.
pub const SERVER_ISN: u32 = 4321;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_CONN_ID: usize = 8;
const OFF_FLAGS: usize = 11;

// Bit positions of the three flags within the final header byte.
const ACK_BIT: u8 = 0b100;
const SYN_BIT: u8 = 0b010;
const FIN_BIT: u8 = 0b001;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Header::encode`] converts to big-endian
/// on the wire and [`Header::decode`] converts back.  Sequence and
/// acknowledgment numbers are kept within the protocol's bounded sequence
/// space by [`crate::seq::advance`]; the codec itself does not police them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender-assigned position marker for this segment.
    pub seq: u32,
    /// Next position the sender expects from its peer.
    pub ack: u32,
    /// Server-assigned connection identifier; `0` means "no connection yet"
    /// and is only legal on a connection-request SYN.
    pub connection_id: u16,
    /// Acknowledgment field is valid.
    pub ack_flag: bool,
    /// Synchronise — connection establishment.
    pub syn_flag: bool,
    /// Finish — connection teardown.
    pub fin_flag: bool,
}

impl Header {
    /// Serialise this header into its 12-byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_CONN_ID..OFF_CONN_ID + 2].copy_from_slice(&self.connection_id.to_be_bytes());

        let mut flags = 0u8;
        if self.ack_flag {
            flags |= ACK_BIT;
        }
        if self.syn_flag {
            flags |= SYN_BIT;
        }
        if self.fin_flag {
            flags |= FIN_BIT;
        }
        buf[OFF_FLAGS] = flags;
        buf
    }

    /// Parse a [`Header`] from the first 12 bytes of `buf`.
    ///
    /// Any bit pattern decodes successfully — semantic validation (flag
    /// combinations, sequence ranges, connection ids) is the caller's job.
    /// The only structural failure is a buffer shorter than [`HEADER_LEN`].
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let seq = u32::from_be_bytes(buf[OFF_SEQ..OFF_SEQ + 4].try_into().unwrap());
        let ack = u32::from_be_bytes(buf[OFF_ACK..OFF_ACK + 4].try_into().unwrap());
        let connection_id =
            u16::from_be_bytes(buf[OFF_CONN_ID..OFF_CONN_ID + 2].try_into().unwrap());
        let flags = buf[OFF_FLAGS];

        Ok(Header {
            seq,
            ack,
            connection_id,
            ack_flag: flags & ACK_BIT != 0,
            syn_flag: flags & SYN_BIT != 0,
            fin_flag: flags & FIN_BIT != 0,
        })
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Build a segment carrying file data.
    pub fn new(header: Header, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Build a payload-free control segment (SYN, ACK, FIN and friends).
    pub fn control(header: Header) -> Self {
        Self {
            header,
            payload: Vec::new(),
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Segment`] from a raw datagram.
    ///
    /// Everything after the 12-byte header is payload; there is no length
    /// field, so the datagram boundary delimits the payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        Ok(Segment {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram too short to contain a header")]
    BufferTooShort,
}
