//! Validation and normalization of uplink targets and peer addresses.

use std::net::{IpAddr, SocketAddr};

use crate::error::{EngineError, Result};

/// Port assumed for an uplink target given as a bare host.
pub const DEFAULT_UPLINK_PORT: u16 = 8000;

/// Port assumed for a peer given as a bare IP.
pub const DEFAULT_P2P_PORT: u16 = 9000;

/// Lowest listen port accepted for P2P.
pub const MIN_P2P_PORT: u32 = 1024;

fn invalid(what: &str, input: &str, why: &str) -> EngineError {
    EngineError::Configuration(format!("invalid {what} '{input}': {why}"))
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Normalize an uplink target to `host:port`.
///
/// Accepts `ip:port`, `[v6]:port`, a bare IP (port 8000), or
/// `hostname[:port]`, optionally prefixed with `http://`.
pub fn normalize_target(input: &str) -> Result<String> {
    let raw = input.trim();
    let s = raw
        .strip_prefix("http://")
        .unwrap_or(raw)
        .trim_end_matches('/');
    if s.is_empty() {
        return Err(invalid("target", input, "empty address"));
    }

    if let Ok(addr) = s.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(invalid("target", input, "port 0"));
        }
        return Ok(addr.to_string());
    }
    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_UPLINK_PORT).to_string());
    }

    let (host, port) = match s.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| invalid("target", input, "port is not a number in 1-65535"))?;
            (host, port)
        }
        None => (s, DEFAULT_UPLINK_PORT),
    };
    if port == 0 {
        return Err(invalid("target", input, "port 0"));
    }
    if !is_hostname(host) {
        return Err(invalid("target", input, "not an IP address or hostname"));
    }
    Ok(format!("{}:{port}", host.to_ascii_lowercase()))
}

/// Parse a peer address. Peers must be IP literals; a bare IP gets port 9000.
pub fn normalize_peer(input: &str) -> Result<SocketAddr> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("peer", input, "empty address"));
    }
    let addr = match s.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => match s.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, DEFAULT_P2P_PORT),
            Err(_) => return Err(invalid("peer", input, "expected IP or IP:port")),
        },
    };
    if addr.port() == 0 {
        return Err(invalid("peer", input, "port 0"));
    }
    if addr.ip().is_unspecified() {
        return Err(invalid("peer", input, "unspecified address"));
    }
    if addr.ip().is_multicast() {
        return Err(invalid("peer", input, "multicast address"));
    }
    Ok(addr)
}

/// Check a P2P listen port against 1024..=65535.
pub fn validate_p2p_port(port: u32) -> Result<u16> {
    if (MIN_P2P_PORT..=u16::MAX as u32).contains(&port) {
        Ok(port as u16)
    } else {
        Err(EngineError::Configuration(format!(
            "P2P port {port} outside {MIN_P2P_PORT}-65535"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_forms() {
        assert_eq!(normalize_target("192.168.1.20").unwrap(), "192.168.1.20:8000");
        assert_eq!(normalize_target("10.0.0.1:8080").unwrap(), "10.0.0.1:8080");
        assert_eq!(normalize_target(" Collector.Lan:9100 ").unwrap(), "collector.lan:9100");
        assert_eq!(normalize_target("localhost").unwrap(), "localhost:8000");
        assert_eq!(normalize_target("http://10.0.0.1:81/").unwrap(), "10.0.0.1:81");
        assert_eq!(normalize_target("::1").unwrap(), "[::1]:8000");
        assert_eq!(normalize_target("[::1]:9001").unwrap(), "[::1]:9001");
    }

    #[test]
    fn target_rejects() {
        for bad in ["", "   ", "/", "http://", "host:0", "host:99999", "bad host", "-x.lan", "a:b:c"] {
            assert!(
                matches!(normalize_target(bad), Err(EngineError::Configuration(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn peer_forms() {
        assert_eq!(
            normalize_peer("10.0.0.5:9000").unwrap(),
            "10.0.0.5:9000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(normalize_peer("10.0.0.5").unwrap().port(), DEFAULT_P2P_PORT);
        assert_eq!(normalize_peer("[fe80::1]:9555").unwrap().port(), 9555);
    }

    #[test]
    fn peer_rejects() {
        for bad in ["", "peer.lan:9000", "0.0.0.0:9000", "224.0.0.1:9000", "10.0.0.5:0", "10.0.0.5:x"] {
            assert!(
                matches!(normalize_peer(bad), Err(EngineError::Configuration(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn port_range() {
        assert!(validate_p2p_port(80).is_err());
        assert!(validate_p2p_port(1023).is_err());
        assert_eq!(validate_p2p_port(1024).unwrap(), 1024);
        assert_eq!(validate_p2p_port(9000).unwrap(), 9000);
        assert_eq!(validate_p2p_port(65535).unwrap(), 65535);
        assert!(validate_p2p_port(65536).is_err());
        assert!(validate_p2p_port(70000).is_err());
    }
}
