//! `udp://[host][:port][?opt=val(&opt=val)*]` grammar parsing.
//!
//! Deliberately hand-rolled rather than pulling in the `url` crate: the
//! grammar is small and fixed (`spec.md` §6), and the teacher crate does not
//! depend on `url` either.

use crate::config::EndpointInput;
use crate::error::{Result, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    Udp,
    UdpLite,
}

#[derive(Debug, Clone)]
pub struct ParsedUrl {
    pub scheme: Scheme,
    /// Empty when the URL has no host — permitted for a read-only listener.
    pub host: String,
    pub port: Option<u16>,
    pub input: EndpointInput,
}

pub fn parse(url: &str) -> Result<ParsedUrl> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("udp://") {
        (Scheme::Udp, rest)
    } else if let Some(rest) = url.strip_prefix("udplite://") {
        (Scheme::UdpLite, rest)
    } else {
        return Err(invalid("missing udp:// or udplite:// scheme"));
    };

    let (authority, query) = match rest.split_once('?') {
        Some((a, q)) => (a, Some(q)),
        None => (rest, None),
    };

    let (host, port) = split_authority(authority)?;
    let input = query.map(parse_query).transpose()?.unwrap_or_default();

    Ok(ParsedUrl {
        scheme,
        host,
        port,
        input,
    })
}

fn split_authority(authority: &str) -> Result<(String, Option<u16>)> {
    if authority.is_empty() {
        return Ok((String::new(), None));
    }
    match authority.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| invalid("invalid port"))?;
            Ok((host.to_string(), Some(port)))
        }
        None => Ok((authority.to_string(), None)),
    }
}

fn parse_query(query: &str) -> Result<EndpointInput> {
    let mut input = EndpointInput::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| invalid("malformed option"))?;
        apply_option(&mut input, key, value)?;
    }
    Ok(input)
}

fn apply_option(input: &mut EndpointInput, key: &str, value: &str) -> Result<()> {
    let as_u32 = || value.parse::<u32>().map_err(|_| invalid(key));
    let as_u64 = || value.parse::<u64>().map_err(|_| invalid(key));
    let as_u16 = || value.parse::<u16>().map_err(|_| invalid(key));
    let as_u8 = || value.parse::<u8>().map_err(|_| invalid(key));
    let as_bool = || match value {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(invalid(key)),
    };
    let as_list = || {
        value
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    };

    match key {
        "buffer_size" => input.buffer_size = Some(as_u32()?),
        "pkt_size" => input.pkt_size = Some(as_u32()?),
        "ttl" => input.ttl = Some(as_u32()?),
        "reuse_socket" => input.reuse_socket = Some(as_bool()?),
        "is_broadcast" => input.is_broadcast = Some(as_bool()?),
        "is_connected" => input.is_connected = Some(as_bool()?),
        "udplite_coverage" => input.udplite_coverage = Some(as_u16()?),
        "sources" => input.sources = Some(as_list()),
        "block" => input.block = Some(as_list()),
        "circular_buffer_size" => input.circular_buffer_size = Some(as_u64()?),
        "bitrate" => input.bitrate = Some(as_u64()?),
        "burst_bits" => input.burst_bits = Some(as_u64()?),
        "overrun_nonfatal" => input.overrun_nonfatal = Some(as_bool()?),
        "timeout" => input.timeout = Some(as_u64()?),
        "k" => input.k = Some(as_u8()?),
        "r" => input.r = Some(as_u8()?),
        "tos" | "dscp" => input.tos = Some(as_u32()?),
        _ => {
            tracing::warn!(option = key, "ignoring unrecognized udp:// query option");
        }
    }
    Ok(())
}

fn invalid(what: &str) -> TransportError {
    TransportError::AddressResolution {
        host: what.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "malformed udp:// url"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_and_options() {
        let parsed = parse("udp://239.0.0.1:5000?ttl=32&bitrate=1000000&k=8&r=3").unwrap();
        assert_eq!(parsed.host, "239.0.0.1");
        assert_eq!(parsed.port, Some(5000));
        assert_eq!(parsed.input.ttl, Some(32));
        assert_eq!(parsed.input.bitrate, Some(1_000_000));
        assert_eq!(parsed.input.k, Some(8));
        assert_eq!(parsed.input.r, Some(3));
    }

    #[test]
    fn empty_host_permitted_for_listener() {
        let parsed = parse("udp://:5000").unwrap();
        assert_eq!(parsed.host, "");
        assert_eq!(parsed.port, Some(5000));
    }

    #[test]
    fn tos_and_dscp_alias_set_the_same_field() {
        let parsed = parse("udp://239.0.0.1:5000?tos=184").unwrap();
        assert_eq!(parsed.input.tos, Some(184));

        let parsed = parse("udp://239.0.0.1:5000?dscp=184").unwrap();
        assert_eq!(parsed.input.tos, Some(184));
    }

    #[test]
    fn udplite_scheme_recognized() {
        let parsed = parse("udplite://127.0.0.1:6000?udplite_coverage=8").unwrap();
        assert_eq!(parsed.scheme, Scheme::UdpLite);
        assert_eq!(parsed.input.udplite_coverage, Some(8));
    }

    #[test]
    fn comma_separated_source_list() {
        let parsed = parse("udp://239.0.0.1:5000?sources=10.0.0.1,10.0.0.2").unwrap();
        assert_eq!(
            parsed.input.sources,
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
        );
    }

    #[test]
    fn missing_scheme_rejected() {
        assert!(parse("239.0.0.1:5000").is_err());
    }

    #[test]
    fn unrecognized_option_is_ignored_not_rejected() {
        let parsed = parse("udp://127.0.0.1:5000?mystery=1").unwrap();
        assert_eq!(parsed.host, "127.0.0.1");
    }
}
