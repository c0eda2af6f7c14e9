//! Endpoint identity for listeners, peers, and queues.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

use crate::error::Error;

/// Transport protocol of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A `(protocol, address)` value identifying a listener or a remote peer.
///
/// Two endpoints are equal iff protocol, IP, and port are all equal; the same
/// address under TCP and UDP is two distinct endpoints. A hash is precomputed
/// at construction so endpoint-keyed map lookups stay cheap, and comparisons
/// check the hash before the fields.
#[derive(Clone)]
pub struct Endpoint {
    protocol: Protocol,
    addr: SocketAddr,
    hash: u64,
}

impl Endpoint {
    pub fn new(protocol: Protocol, addr: SocketAddr) -> Self {
        let hash = Self::compute_hash(protocol, &addr);
        Self {
            protocol,
            addr,
            hash,
        }
    }

    /// Builds an endpoint from an IP string and port.
    pub fn from_parts(protocol: Protocol, ip: &str, port: u16) -> Result<Self, Error> {
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| Error::InvalidAddress(format!("{ip}:{port}")))?;
        Ok(Self::new(protocol, SocketAddr::new(ip, port)))
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    /// The precomputed hash value.
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    // Protocol tag seeds the hash so the same address:port under TCP and UDP
    // lands in different buckets; address bytes are mixed 31*h + b with the
    // port folded in last.
    fn compute_hash(protocol: Protocol, addr: &SocketAddr) -> u64 {
        let mut h: u64 = match protocol {
            Protocol::Tcp => 0,
            Protocol::Udp => 1,
        };
        match addr.ip() {
            IpAddr::V4(ip) => {
                for b in ip.octets() {
                    h = h.wrapping_mul(31).wrapping_add(u64::from(b));
                }
            }
            IpAddr::V6(ip) => {
                for b in ip.octets() {
                    h = h.wrapping_mul(31).wrapping_add(u64::from(b));
                }
            }
        }
        (h << 16).wrapping_add(u64::from(addr.port()))
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        // Hash first: a mismatch settles most comparisons in one branch.
        self.hash == other.hash && self.protocol == other.protocol && self.addr == other.addr
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl PartialOrd for Endpoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Endpoint {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| self.protocol.cmp(&other.protocol))
            .then_with(|| self.addr.port().cmp(&other.addr.port()))
            .then_with(|| self.addr.ip().cmp(&other.addr.ip()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        write!(f, "{}://{}", proto, self.addr)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn equality_requires_every_field() {
        let a = Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 8080).unwrap();
        let b = Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 8080).unwrap();
        let c = Endpoint::from_parts(Protocol::Udp, "127.0.0.1", 8080).unwrap();
        let d = Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 8081).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn protocol_tag_distinguishes_hashes() {
        let tcp = Endpoint::from_parts(Protocol::Tcp, "10.0.0.1", 53).unwrap();
        let udp = Endpoint::from_parts(Protocol::Udp, "10.0.0.1", 53).unwrap();
        assert_ne!(tcp.hash_value(), udp.hash_value());
    }

    #[test]
    fn usable_as_map_key() {
        let mut map = HashMap::new();
        let node = Endpoint::from_parts(Protocol::Tcp, "::1", 9000).unwrap();
        map.insert(node.clone(), 42);
        assert_eq!(map.get(&node), Some(&42));
        assert!(node.is_ipv6());
    }

    #[test]
    fn ordering_is_total_and_hash_first() {
        let mut nodes = vec![
            Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 2).unwrap(),
            Endpoint::from_parts(Protocol::Udp, "127.0.0.1", 1).unwrap(),
            Endpoint::from_parts(Protocol::Tcp, "127.0.0.1", 1).unwrap(),
        ];
        nodes.sort();
        for pair in nodes.windows(2) {
            assert!(pair[0] <= pair[1]);
            assert!(pair[0].hash_value() <= pair[1].hash_value());
        }
    }

    #[test]
    fn rejects_unparsable_ip() {
        assert!(Endpoint::from_parts(Protocol::Tcp, "not-an-ip", 1).is_err());
    }
}
