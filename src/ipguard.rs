//! CIDR allow-list for the admin endpoints.
//!
//! Blocks come from configuration; a malformed block logs a warning and is
//! ignored. With no valid blocks every admin request is denied.

use std::net::IpAddr;
use tracing::warn;

/// Parsed allow-list.
#[derive(Debug, Clone)]
pub struct IpGuard {
    networks: Vec<(IpAddr, u8)>,
}

impl IpGuard {
    /// Parse `address/prefix` blocks. A bare address is a host block.
    pub fn from_blocks(blocks: &[String]) -> Self {
        let mut networks = Vec::new();
        for block in blocks {
            match parse_cidr(block) {
                Some(network) => networks.push(network),
                None => warn!("ignoring malformed CIDR block: {block}"),
            }
        }
        Self { networks }
    }

    /// Whether `ip` falls inside any configured block.
    pub fn is_allowed(&self, ip: IpAddr) -> bool {
        self.networks
            .iter()
            .any(|(network, prefix)| cidr_contains(*network, *prefix, ip))
    }
}

fn parse_cidr(block: &str) -> Option<(IpAddr, u8)> {
    let block = block.trim();
    let (addr_part, prefix_part) = match block.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (block, None),
    };
    let addr: IpAddr = addr_part.parse().ok()?;
    let max_prefix = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    let prefix = match prefix_part {
        Some(p) => p.parse::<u8>().ok()?,
        None => max_prefix,
    };
    if prefix > max_prefix {
        return None;
    }
    Some((addr, prefix))
}

fn cidr_contains(network: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (network, ip) {
        (IpAddr::V4(network), IpAddr::V4(ip)) => {
            prefix_match(&network.octets(), &ip.octets(), prefix)
        }
        (IpAddr::V6(network), IpAddr::V6(ip)) => {
            prefix_match(&network.octets(), &ip.octets(), prefix)
        }
        _ => false,
    }
}

fn prefix_match(network: &[u8], ip: &[u8], prefix: u8) -> bool {
    let full_bytes = (prefix / 8) as usize;
    if network[..full_bytes] != ip[..full_bytes] {
        return false;
    }
    let remaining_bits = prefix % 8;
    if remaining_bits == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - remaining_bits);
    (network[full_bytes] & mask) == (ip[full_bytes] & mask)
}

/// Resolve the client address: leftmost `X-Forwarded-For` entry when the
/// header is present and parseable, else the transport peer.
pub fn client_ip(forwarded_for: Option<&str>, peer: IpAddr) -> IpAddr {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn guard(blocks: &[&str]) -> IpGuard {
        IpGuard::from_blocks(&blocks.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn host_block_matches_exactly() {
        let g = guard(&["127.0.0.1/32"]);
        assert!(g.is_allowed(ip("127.0.0.1")));
        assert!(!g.is_allowed(ip("127.0.0.2")));
    }

    #[test]
    fn network_block_matches_range() {
        let g = guard(&["192.168.0.0/16"]);
        assert!(g.is_allowed(ip("192.168.1.42")));
        assert!(g.is_allowed(ip("192.168.255.255")));
        assert!(!g.is_allowed(ip("192.169.0.1")));
    }

    #[test]
    fn non_octet_prefix_masks_partial_byte() {
        let g = guard(&["172.16.0.0/12"]);
        assert!(g.is_allowed(ip("172.16.0.1")));
        assert!(g.is_allowed(ip("172.31.255.254")));
        assert!(!g.is_allowed(ip("172.32.0.1")));
    }

    #[test]
    fn bare_address_is_a_host_block() {
        let g = guard(&["10.1.2.3"]);
        assert!(g.is_allowed(ip("10.1.2.3")));
        assert!(!g.is_allowed(ip("10.1.2.4")));
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let g = guard(&["not-an-ip", "10.0.0.0/33", "10.0.0.0/8"]);
        assert!(g.is_allowed(ip("10.9.9.9")));
        assert!(!g.is_allowed(ip("11.0.0.1")));
    }

    #[test]
    fn empty_list_denies_everything() {
        let g = guard(&[]);
        assert!(!g.is_allowed(ip("127.0.0.1")));
    }

    #[test]
    fn families_never_cross_match() {
        let g = guard(&["::1/128"]);
        assert!(g.is_allowed(ip("::1")));
        assert!(!g.is_allowed(ip("127.0.0.1")));
    }

    #[test]
    fn client_ip_prefers_leftmost_forwarded_entry() {
        let peer = ip("10.0.0.1");
        assert_eq!(
            client_ip(Some("203.0.113.7, 10.0.0.2"), peer),
            ip("203.0.113.7")
        );
        assert_eq!(client_ip(Some("garbage"), peer), peer);
        assert_eq!(client_ip(None, peer), peer);
    }
}
