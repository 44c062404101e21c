//! Endpoint manager: UDP/UDP-Lite socket creation, address resolution,
//! multicast join/leave with source filtering, and socket-option tuning
//! (`spec.md` §4.7). Grounded on `udp_open` in
//! `examples/original_source/libavformat/udp.c` for option-setting order
//! and multicast bind-fallback behavior, expressed over `socket2::Socket`
//! rather than raw `libc` calls wherever `socket2` exposes the option.

use std::io::{self, Read as _};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::EndpointConfig;
use crate::error::{Result, TransportError};

/// Linux's `IPPROTO_UDPLITE`; not exposed by `socket2::Protocol`.
const IPPROTO_UDPLITE: i32 = 136;
#[cfg(target_os = "linux")]
const UDPLITE_SEND_CSCOV: i32 = 10;
#[cfg(target_os = "linux")]
const UDPLITE_RECV_CSCOV: i32 = 11;

pub struct Endpoint {
    socket: Socket,
    pub peer: Option<SocketAddr>,
    pub local: SocketAddr,
    pub is_multicast: bool,
}

pub struct OpenParams<'a> {
    pub host: &'a str,
    pub port: Option<u16>,
    pub udp_lite: bool,
    pub is_output: bool,
    pub is_input: bool,
    pub config: &'a EndpointConfig,
}

impl Endpoint {
    pub fn open(params: OpenParams<'_>) -> Result<Self> {
        let resolved = resolve(params.host, params.port)?;
        let is_multicast = resolved.map(|a| a.ip().is_multicast()).unwrap_or(false);
        let domain = match resolved {
            Some(SocketAddr::V6(_)) => Domain::IPV6,
            _ => Domain::IPV4,
        };

        let protocol = if params.udp_lite {
            Some(Protocol::from(IPPROTO_UDPLITE))
        } else {
            Some(Protocol::UDP)
        };

        let socket = Socket::new(domain, Type::DGRAM, protocol)
            .map_err(TransportError::SocketCreate)?;

        let cfg = params.config;

        let reuse = cfg.reuse_socket.unwrap_or(is_multicast);
        if reuse {
            socket
                .set_reuse_address(true)
                .map_err(|e| sockopt_err("SO_REUSEADDR", e))?;
        }
        if cfg.is_broadcast {
            socket
                .set_broadcast(true)
                .map_err(|e| sockopt_err("SO_BROADCAST", e))?;
        }
        if params.udp_lite {
            set_udplite_coverage(&socket, cfg.udplite_coverage)?;
        }
        if let Some(tos) = cfg.tos {
            match domain {
                Domain::IPV6 => socket
                    .set_tclass_v6(tos)
                    .map_err(|e| sockopt_err("IPV6_TCLASS", e))?,
                _ => socket.set_tos(tos).map_err(|e| sockopt_err("IP_TOS", e))?,
            }
        }

        let bind_addr = if is_multicast && params.is_input && !params.is_output {
            resolved
        } else {
            None
        };

        let local_addr: SocketAddr = match bind_addr {
            Some(addr) => match socket.bind(&SockAddr::from(addr)) {
                Ok(()) => addr,
                Err(e) => {
                    tracing::warn!(error = %e, "multicast bind failed, falling back to local address");
                    let fallback = wildcard_addr(domain, params.port.unwrap_or(0));
                    socket
                        .bind(&SockAddr::from(fallback))
                        .map_err(|e| TransportError::BindFailed {
                            addr: fallback.to_string(),
                            source: e,
                        })?;
                    fallback
                }
            },
            None => {
                let local = if params.is_input {
                    wildcard_addr(domain, params.port.unwrap_or(0))
                } else {
                    wildcard_addr(domain, 0)
                };
                socket
                    .bind(&SockAddr::from(local))
                    .map_err(|e| TransportError::BindFailed {
                        addr: local.to_string(),
                        source: e,
                    })?;
                local
            }
        };

        if is_multicast {
            join_multicast(&socket, resolved.unwrap(), cfg)?;
            if cfg.ttl > 0 {
                set_multicast_ttl(&socket, resolved.unwrap(), cfg.ttl)?;
            }
        }

        if cfg.is_connected {
            if let Some(peer) = resolved {
                socket
                    .connect(&SockAddr::from(peer))
                    .map_err(|e| TransportError::ConnectFailed {
                        addr: peer.to_string(),
                        source: e,
                    })?;
            }
        }

        socket
            .set_send_buffer_size(cfg.buffer_size_tx as usize)
            .map_err(|e| sockopt_err("SO_SNDBUF", e))?;
        socket
            .set_recv_buffer_size(cfg.buffer_size_rx as usize)
            .map_err(|e| sockopt_err("SO_RCVBUF", e))?;

        Ok(Endpoint {
            socket,
            peer: resolved,
            local: local_addr,
            is_multicast,
        })
    }

    pub fn send(&self, data: &[u8]) -> Result<usize> {
        let result = if let Some(peer) = self.peer {
            self.socket.send_to(data, &SockAddr::from(peer))
        } else {
            self.socket.send(data)
        };
        result.map_err(to_io_result_err)
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.socket.read(buf).map_err(to_io_result_err)
    }

    pub fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.socket
            .set_read_timeout(timeout)
            .map_err(|e| sockopt_err("SO_RCVTIMEO", e))
    }

    pub fn leave_multicast(&self, cfg: &EndpointConfig) {
        if let Some(peer) = self.peer {
            if let Err(e) = leave_multicast_group(&self.socket, peer, cfg) {
                tracing::warn!(error = %e, "failed to leave multicast group on close");
            }
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

fn resolve(host: &str, port: Option<u16>) -> Result<Option<SocketAddr>> {
    if host.is_empty() {
        return Ok(None);
    }
    let port = port.unwrap_or(0);
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::AddressResolution {
            host: host.to_string(),
            source: e,
        })?
        .next()
        .map(Some)
        .ok_or_else(|| TransportError::AddressResolution {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        })
}

fn wildcard_addr(domain: Domain, port: u16) -> SocketAddr {
    if domain == Domain::IPV6 {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }
}

fn sockopt_err(option: &'static str, source: io::Error) -> TransportError {
    TransportError::SocketOption { option, source }
}

fn to_io_result_err(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock => TransportError::WouldBlock,
        io::ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::SocketOption {
            option: "send/recv",
            source: e,
        },
    }
}

fn join_multicast(socket: &Socket, group: SocketAddr, cfg: &EndpointConfig) -> Result<()> {
    match group.ip() {
        IpAddr::V4(addr) => {
            if cfg.sources.is_empty() {
                socket
                    .join_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED)
                    .map_err(|e| multicast_err(addr.to_string(), e))?;
            } else {
                for source in &cfg.sources {
                    if let IpAddr::V4(src) = source {
                        source_membership(socket, addr, *src, true)
                            .map_err(|e| multicast_err(addr.to_string(), e))?;
                    }
                }
                for blocked in &cfg.block {
                    if let IpAddr::V4(src) = blocked {
                        block_source(socket, addr, *src)
                            .map_err(|e| multicast_err(addr.to_string(), e))?;
                    }
                }
            }
        }
        IpAddr::V6(addr) => {
            if !cfg.sources.is_empty() || !cfg.block.is_empty() {
                tracing::warn!(
                    "source-specific multicast (sources/block) is not implemented for IPv6, joining as any-source multicast"
                );
            }
            socket
                .join_multicast_v6(&addr, 0)
                .map_err(|e| multicast_err(addr.to_string(), e))?;
        }
    }
    Ok(())
}

fn leave_multicast_group(socket: &Socket, group: SocketAddr, cfg: &EndpointConfig) -> Result<()> {
    match group.ip() {
        IpAddr::V4(addr) => {
            if cfg.sources.is_empty() {
                socket
                    .leave_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED)
                    .map_err(|e| multicast_err(addr.to_string(), e))?;
            } else {
                for source in &cfg.sources {
                    if let IpAddr::V4(src) = source {
                        source_membership(socket, addr, *src, false)
                            .map_err(|e| multicast_err(addr.to_string(), e))?;
                    }
                }
            }
        }
        IpAddr::V6(addr) => {
            socket
                .leave_multicast_v6(&addr, 0)
                .map_err(|e| multicast_err(addr.to_string(), e))?;
        }
    }
    Ok(())
}

/// Linux source-specific multicast socket options. `socket2` does not wrap
/// these, so they go through raw `setsockopt` — the same substitution
/// `udp.c` itself makes, choosing `IP_ADD_SOURCE_MEMBERSHIP`/
/// `IP_DROP_SOURCE_MEMBERSHIP` over the more modern `MCAST_JOIN_SOURCE_GROUP`
/// for portability across older kernels.
const IP_ADD_SOURCE_MEMBERSHIP: i32 = 39;
const IP_DROP_SOURCE_MEMBERSHIP: i32 = 40;
const IP_BLOCK_SOURCE: i32 = 38;

#[repr(C)]
struct IpMreqSource {
    imr_multiaddr: libc::in_addr,
    imr_interface: libc::in_addr,
    imr_sourceaddr: libc::in_addr,
}

fn to_in_addr(addr: Ipv4Addr) -> libc::in_addr {
    libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.octets()),
    }
}

fn source_membership(socket: &Socket, group: Ipv4Addr, source: Ipv4Addr, join: bool) -> io::Result<()> {
    let mreq = IpMreqSource {
        imr_multiaddr: to_in_addr(group),
        imr_interface: to_in_addr(Ipv4Addr::UNSPECIFIED),
        imr_sourceaddr: to_in_addr(source),
    };
    let opt = if join {
        IP_ADD_SOURCE_MEMBERSHIP
    } else {
        IP_DROP_SOURCE_MEMBERSHIP
    };
    setsockopt_raw(socket, libc::IPPROTO_IP, opt, &mreq)
}

fn block_source(socket: &Socket, group: Ipv4Addr, source: Ipv4Addr) -> io::Result<()> {
    let mreq = IpMreqSource {
        imr_multiaddr: to_in_addr(group),
        imr_interface: to_in_addr(Ipv4Addr::UNSPECIFIED),
        imr_sourceaddr: to_in_addr(source),
    };
    setsockopt_raw(socket, libc::IPPROTO_IP, IP_BLOCK_SOURCE, &mreq)
}

fn setsockopt_raw<T>(socket: &Socket, level: i32, name: i32, value: &T) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn set_multicast_ttl(socket: &Socket, group: SocketAddr, ttl: u32) -> Result<()> {
    match group.ip() {
        IpAddr::V4(_) => socket
            .set_multicast_ttl_v4(ttl)
            .map_err(|e| sockopt_err("IP_MULTICAST_TTL", e)),
        IpAddr::V6(_) => socket
            .set_multicast_hops_v6(ttl)
            .map_err(|e| sockopt_err("IPV6_MULTICAST_HOPS", e)),
    }
}

fn multicast_err(group: String, source: io::Error) -> TransportError {
    TransportError::MulticastJoin { group, source }
}

#[cfg(target_os = "linux")]
fn set_udplite_coverage(socket: &Socket, coverage: Option<u16>) -> Result<()> {
    // Default for UDP-Lite per spec.md §4.7: the 8-byte UDP header itself.
    let coverage = coverage.unwrap_or(8) as i32;
    let fd = socket.as_raw_fd();
    for (name, opt) in [
        ("UDPLITE_SEND_CSCOV", UDPLITE_SEND_CSCOV),
        ("UDPLITE_RECV_CSCOV", UDPLITE_RECV_CSCOV),
    ] {
        let ret = unsafe {
            libc::setsockopt(
                fd,
                IPPROTO_UDPLITE,
                opt,
                &coverage as *const i32 as *const libc::c_void,
                std::mem::size_of::<i32>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(sockopt_err(name, io::Error::last_os_error()));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_udplite_coverage(_socket: &Socket, _coverage: Option<u16>) -> Result<()> {
    Err(TransportError::SocketOption {
        option: "udplite_coverage",
        source: io::Error::new(
            io::ErrorKind::Unsupported,
            "UDP-Lite checksum coverage is only implemented on Linux",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_empty_host_is_listener() {
        assert!(resolve("", Some(5000)).unwrap().is_none());
    }

    #[test]
    fn resolve_loopback() {
        let addr = resolve("127.0.0.1", Some(5000)).unwrap().unwrap();
        assert_eq!(addr.port(), 5000);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn wildcard_addr_v4() {
        let addr = wildcard_addr(Domain::IPV4, 1234);
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 1234));
    }
}
