//! Endpoint configuration: the two-layer `Input`/`Config` pattern — every
//! field optional and documented with its unit and default on the `Input`
//! side, resolved into a concrete, validated `EndpointConfig` before the
//! endpoint manager touches a socket.
//!
//! Query-string options and a programmatically supplied config table are
//! both `EndpointInput` values; the caller merges them with the URL's
//! fields taking precedence (`spec.md` Design Notes §9: "query takes
//! precedence").

use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// `BLOCK_BYTES` from `spec.md` §3 — fixed, not user-configurable.
pub const BLOCK_BYTES: usize = 1472;
pub const MAX_RECOVERY_COUNT: u8 = 10;
const DEFAULT_K: u8 = 10;
const DEFAULT_R: u8 = 4;
const DEFAULT_TTL: u32 = 16;
const DEFAULT_TX_BUFFER: u32 = 32768;
const DEFAULT_RX_BUFFER: u32 = 65536;
/// `7 * 4096`, scaled ×188 from the user-facing value per `spec.md` §4.7.
const DEFAULT_CIRCULAR_BUFFER_SIZE: u64 = 7 * 4096;
const CIRCULAR_BUFFER_SCALE: u64 = 188;

/// Every field optional; populated piecemeal from a URL query string and/or
/// a deserialized config table, then merged and defaulted into
/// [`EndpointConfig`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointInput {
    /// `SO_SNDBUF`/`SO_RCVBUF` size in bytes. Defaults differ by direction
    /// (tx 32768, rx 65536) when unset.
    pub buffer_size: Option<u32>,
    /// Caller-visible MTU; `max_packet_size = pkt_size - 3`. Default 1472.
    pub pkt_size: Option<u32>,
    /// Multicast TTL / hop limit. Default 16.
    pub ttl: Option<u32>,
    /// `SO_REUSEADDR`. Auto-enabled for multicast unless explicitly `false`.
    pub reuse_socket: Option<bool>,
    /// `SO_BROADCAST`.
    pub is_broadcast: Option<bool>,
    /// Call `connect()` so subsequent sends bypass destination resolution.
    pub is_connected: Option<bool>,
    /// UDP-Lite checksum coverage in bytes (`UDPLITE_SEND_CSCOV`/`_RECV_CSCOV`).
    pub udplite_coverage: Option<u16>,
    /// Multicast source include list (SSM).
    pub sources: Option<Vec<String>>,
    /// Multicast source exclude list.
    pub block: Option<Vec<String>>,
    /// Ring buffer capacity in the user-facing unit, scaled ×188 internally.
    /// Default `7 * 4096`.
    pub circular_buffer_size: Option<u64>,
    /// Token-bucket rate in bits/sec for the tx worker. Unset disables pacing.
    pub bitrate: Option<u64>,
    /// Token-bucket burst allowance in bits.
    pub burst_bits: Option<u64>,
    /// Downgrade a full ring on read from fatal to a dropped record.
    pub overrun_nonfatal: Option<bool>,
    /// Read-side deadline in milliseconds.
    pub timeout: Option<u64>,
    /// FEC originals per group (`K`). Default 10.
    pub k: Option<u8>,
    /// FEC recovery blocks per group (`R`). Default 4.
    pub r: Option<u8>,
    /// DSCP/TOS byte (`IP_TOS` / `IPV6_TCLASS`). Unset leaves the kernel
    /// default in place.
    pub tos: Option<u32>,
}

impl EndpointInput {
    /// Merge `self` (URL query options) over `table` (programmatic config),
    /// field by field, with `self` taking precedence per populated field.
    pub fn merged_over(self, table: EndpointInput) -> EndpointInput {
        EndpointInput {
            buffer_size: self.buffer_size.or(table.buffer_size),
            pkt_size: self.pkt_size.or(table.pkt_size),
            ttl: self.ttl.or(table.ttl),
            reuse_socket: self.reuse_socket.or(table.reuse_socket),
            is_broadcast: self.is_broadcast.or(table.is_broadcast),
            is_connected: self.is_connected.or(table.is_connected),
            udplite_coverage: self.udplite_coverage.or(table.udplite_coverage),
            sources: self.sources.or(table.sources),
            block: self.block.or(table.block),
            circular_buffer_size: self.circular_buffer_size.or(table.circular_buffer_size),
            bitrate: self.bitrate.or(table.bitrate),
            burst_bits: self.burst_bits.or(table.burst_bits),
            overrun_nonfatal: self.overrun_nonfatal.or(table.overrun_nonfatal),
            timeout: self.timeout.or(table.timeout),
            k: self.k.or(table.k),
            r: self.r.or(table.r),
            tos: self.tos.or(table.tos),
        }
    }
}

/// Resolved, validated endpoint configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub buffer_size_tx: u32,
    pub buffer_size_rx: u32,
    pub pkt_size: u32,
    pub max_packet_size: usize,
    pub ttl: u32,
    pub reuse_socket: Option<bool>,
    pub is_broadcast: bool,
    pub is_connected: bool,
    pub udplite_coverage: Option<u16>,
    pub sources: Vec<IpAddr>,
    pub block: Vec<IpAddr>,
    pub circular_buffer_size: usize,
    pub bitrate: u64,
    pub burst_bits: u64,
    pub overrun_nonfatal: bool,
    pub timeout: Option<Duration>,
    pub k: u8,
    pub r: u8,
    pub tos: Option<u32>,
}

impl EndpointConfig {
    pub fn from_input(input: EndpointInput) -> Result<Self> {
        let pkt_size = input.pkt_size.unwrap_or(BLOCK_BYTES as u32);
        if (pkt_size as usize) < 3 {
            return Err(TransportError::SocketOption {
                option: "pkt_size",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "pkt_size must be at least 3",
                ),
            });
        }

        let k = input.k.unwrap_or(DEFAULT_K);
        let r = input.r.unwrap_or(DEFAULT_R);
        if r > MAX_RECOVERY_COUNT {
            return Err(TransportError::SocketOption {
                option: "r",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("recovery count {r} exceeds MAX_RECOVERY_COUNT {MAX_RECOVERY_COUNT}"),
                ),
            });
        }
        if (k as u16 + r as u16) > 128 {
            return Err(TransportError::SocketOption {
                option: "k+r",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "k + r exceeds the 7-bit in-group index capacity (128)",
                ),
            });
        }

        let buffer_size = input.buffer_size;
        let circular_buffer_size_user =
            input.circular_buffer_size.unwrap_or(DEFAULT_CIRCULAR_BUFFER_SIZE);

        let sources = parse_ip_list(input.sources.as_deref().unwrap_or(&[]), "sources")?;
        let block = parse_ip_list(input.block.as_deref().unwrap_or(&[]), "block")?;

        Ok(EndpointConfig {
            buffer_size_tx: buffer_size.unwrap_or(DEFAULT_TX_BUFFER),
            buffer_size_rx: buffer_size.unwrap_or(DEFAULT_RX_BUFFER),
            pkt_size,
            max_packet_size: pkt_size as usize - 3,
            ttl: input.ttl.unwrap_or(DEFAULT_TTL),
            reuse_socket: input.reuse_socket,
            is_broadcast: input.is_broadcast.unwrap_or(false),
            is_connected: input.is_connected.unwrap_or(false),
            udplite_coverage: input.udplite_coverage,
            sources,
            block,
            circular_buffer_size: (circular_buffer_size_user * CIRCULAR_BUFFER_SCALE) as usize,
            bitrate: input.bitrate.unwrap_or(0),
            burst_bits: input.burst_bits.unwrap_or(0),
            overrun_nonfatal: input.overrun_nonfatal.unwrap_or(false),
            timeout: input.timeout.map(Duration::from_millis),
            k,
            r,
            tos: input.tos,
        })
    }
}

fn parse_ip_list(values: &[String], option: &'static str) -> Result<Vec<IpAddr>> {
    values
        .iter()
        .map(|v| {
            v.parse::<IpAddr>().map_err(|e| TransportError::SocketOption {
                option,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EndpointConfig::from_input(EndpointInput::default()).unwrap();
        assert_eq!(cfg.pkt_size, 1472);
        assert_eq!(cfg.max_packet_size, 1469);
        assert_eq!(cfg.k, 10);
        assert_eq!(cfg.r, 4);
        assert_eq!(cfg.ttl, 16);
        assert_eq!(cfg.buffer_size_tx, 32768);
        assert_eq!(cfg.buffer_size_rx, 65536);
        assert_eq!(cfg.circular_buffer_size, 7 * 4096 * 188);
    }

    #[test]
    fn url_input_overrides_table_input() {
        let url_input = EndpointInput {
            ttl: Some(5),
            ..Default::default()
        };
        let table_input = EndpointInput {
            ttl: Some(64),
            bitrate: Some(1_000_000),
            ..Default::default()
        };
        let merged = url_input.merged_over(table_input);
        assert_eq!(merged.ttl, Some(5));
        assert_eq!(merged.bitrate, Some(1_000_000));
    }

    #[test]
    fn rejects_recovery_count_above_max() {
        let input = EndpointInput {
            r: Some(11),
            ..Default::default()
        };
        assert!(EndpointConfig::from_input(input).is_err());
    }

    #[test]
    fn rejects_index_capacity_overflow() {
        let input = EndpointInput {
            k: Some(120),
            r: Some(10),
            ..Default::default()
        };
        assert!(EndpointConfig::from_input(input).is_err());
    }
}
