//! Error kinds surfaced across the endpoint, ring buffer, and FEC pipelines.

use std::io;

/// Errors returned by the transport facade and its collaborators.
///
/// Variants line up with the propagation policy: `WouldBlock` and `Timeout`
/// are transient and leave state untouched, `BufferFull` is the tx-side
/// transient-retry condition while `BufferOverrun` is the rx-side consumer
/// falling behind (fatal unless `overrun_nonfatal` is set),
/// `FecMalformedHeader`/`FecGroupFull`/`CodecError` abort only the current
/// group, `PacketTooLarge` rejects an oversized caller write at the facade
/// before it ever reaches the encoder, and `Closed` supersedes everything
/// once an endpoint has been torn down.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("failed to resolve address {host:?}: {source}")]
    AddressResolution { host: String, source: io::Error },

    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("failed to set socket option {option}: {source}")]
    SocketOption {
        option: &'static str,
        source: io::Error,
    },

    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: String,
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: io::Error,
    },

    #[error("failed to join multicast group {group}: {source}")]
    MulticastJoin {
        group: String,
        source: io::Error,
    },

    #[error("operation would block")]
    WouldBlock,

    #[error("operation timed out")]
    Timeout,

    #[error("ring buffer is full")]
    BufferFull,

    #[error("ring buffer overrun (record length {declared} exceeds capacity)")]
    BufferOverrun { declared: u32 },

    #[error("write of {len} bytes exceeds max_packet_size {max}")]
    PacketTooLarge { len: usize, max: usize },

    #[error("malformed block header: index {index} out of range for type {type_bit}")]
    FecMalformedHeader { type_bit: u8, index: u8 },

    #[error("FEC group is full")]
    FecGroupFull,

    #[error("FEC codec failure: {0}")]
    CodecError(String),

    #[error("endpoint is closed")]
    Closed,
}

impl TransportError {
    /// True for errors the propagation policy defines as transient: the
    /// caller may retry without the endpoint having changed state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::WouldBlock | TransportError::Timeout | TransportError::BufferFull
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
