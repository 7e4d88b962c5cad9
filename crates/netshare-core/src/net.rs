//! Local address resolution and subnet math.
//!
//! Discovery, the sharing server and share URLs all need to know the address
//! this device has on the LAN. The lookup goes through
//! [`LocalAddressResolver`] so tests can pin it.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Resolves the IPv4 address of this device on the local network.
pub trait LocalAddressResolver: Send + Sync + fmt::Debug {
    /// The primary local IPv4 address, if the device has one.
    fn local_ip(&self) -> Option<Ipv4Addr>;
}

/// Resolver backed by the OS routing table.
///
/// Connecting a UDP socket selects the outbound interface without sending
/// any packet; the socket's local address is the LAN address.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl LocalAddressResolver for SystemResolver {
    fn local_ip(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("8.8.8.8:80").ok()?;
        match socket.local_addr().ok()? {
            SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
            _ => None,
        }
    }
}

/// Resolver that always answers with a fixed address.
#[derive(Debug, Clone, Copy)]
pub struct FixedResolver(pub Option<Ipv4Addr>);

impl LocalAddressResolver for FixedResolver {
    fn local_ip(&self) -> Option<Ipv4Addr> {
        self.0
    }
}

/// A `/24` IPv4 network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    prefix: [u8; 3],
}

impl Subnet {
    /// The `/24` network containing `addr`.
    #[must_use]
    pub fn containing(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        Self { prefix: [a, b, c] }
    }

    /// Host addresses `.1` through `.254`, in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + Send + 'static {
        let [a, b, c] = self.prefix;
        (1..=254u8).map(move |d| Ipv4Addr::new(a, b, c, d))
    }

    /// Whether `addr` lies in this network.
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let [a, b, c, _] = addr.octets();
        [a, b, c] == self.prefix
    }

    /// The network address (`x.y.z.0`).
    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        let [a, b, c] = self.prefix;
        Ipv4Addr::new(a, b, c, 0)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/24", self.network())
    }
}

impl std::str::FromStr for Subnet {
    type Err = crate::error::Error;

    /// Accepts `a.b.c.d` or `a.b.c.d/24`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let addr = s.strip_suffix("/24").unwrap_or(s);
        addr.parse::<Ipv4Addr>().map(Self::containing).map_err(|_| {
            crate::error::Error::InvalidInput(format!(
                "Invalid subnet '{s}'. Use an IPv4 address or a /24 network (e.g., 192.168.1.0/24)"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_hosts() {
        let subnet = Subnet::containing(Ipv4Addr::new(192, 168, 1, 42));
        let hosts: Vec<_> = subnet.hosts().collect();

        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));
        assert!(hosts.iter().all(|h| subnet.contains(*h)));
    }

    #[test]
    fn test_subnet_contains() {
        let subnet = Subnet::containing(Ipv4Addr::new(10, 0, 0, 7));
        assert!(subnet.contains(Ipv4Addr::new(10, 0, 0, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 0, 1, 7)));
    }

    #[test]
    fn test_subnet_parse_and_display() {
        let subnet: Subnet = "192.168.4.0/24".parse().unwrap();
        assert_eq!(subnet.to_string(), "192.168.4.0/24");

        let subnet: Subnet = "10.1.2.3".parse().unwrap();
        assert_eq!(subnet.network(), Ipv4Addr::new(10, 1, 2, 0));

        assert!("not-an-ip".parse::<Subnet>().is_err());
    }

    #[test]
    fn test_fixed_resolver() {
        let resolver = FixedResolver(Some(Ipv4Addr::LOCALHOST));
        assert_eq!(resolver.local_ip(), Some(Ipv4Addr::LOCALHOST));
        assert_eq!(FixedResolver(None).local_ip(), None);
    }
}
