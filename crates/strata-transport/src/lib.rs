//! # strata-transport
//!
//! Real-time UDP transport with application-layer Reed-Solomon forward
//! error correction and a decoupling ring buffer between network I/O and
//! the application.
//!
//! On the send side, messages are grouped into fixed-size blocks, expanded
//! with Reed-Solomon recovery blocks once a group fills, and transmitted at
//! a rate-shaped pace. On the receive side, blocks are collected off the
//! wire, missing originals are reconstructed whenever any `K` of `N` have
//! arrived, and recovered originals are handed to the application in group
//! order.
//!
//! ## Crate structure
//!
//! - [`header`] — block header codec (type bit + in-group index)
//! - [`codec`] — Reed-Solomon codec adapter over `reed-solomon-simd`
//! - [`group`] — per-direction FEC group assembly/dispersal state
//! - [`encoder`] — encoder pipeline: writes → complete-group wire records
//! - [`decoder`] — decoder pipeline: wire records → published originals
//! - [`ring`] — length-prefixed byte FIFO + token-bucket tx pacing
//! - [`endpoint`] — UDP/UDP-Lite socket setup, multicast, socket tuning
//! - [`config`] — URL-query/config-table option resolution
//! - [`url`] — `udp://`/`udplite://` grammar parsing
//! - [`transport`] — the `open`/`read`/`write`/`close` facade
//! - [`stats`] — endpoint counters
//! - [`error`] — the error kinds surfaced across all of the above

pub mod codec;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod header;
pub mod ring;
pub mod stats;
pub mod transport;
pub mod url;

pub use error::{Result, TransportError};
pub use transport::{OpenFlags, Transport};
