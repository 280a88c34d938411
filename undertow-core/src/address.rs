//! Local network address resolution for player-reachable URLs.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;

/// Errors from local address resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("No non-loopback IPv4 address found")]
    NoLocalAddressFound,

    #[error("Failed to enumerate network interfaces: {reason}")]
    Interfaces { reason: String },
}

/// Rule for picking among candidate addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPreference {
    /// First non-loopback IPv4 address in interface order
    First,
    /// First address with this leading octet, else the first candidate
    PreferFirstOctet(u8),
}

impl Default for AddressPreference {
    fn default() -> Self {
        Self::PreferFirstOctet(192)
    }
}

impl fmt::Display for AddressPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("first"),
            Self::PreferFirstOctet(octet) => write!(f, "prefer-{octet}"),
        }
    }
}

impl FromStr for AddressPreference {
    type Err = String;

    /// Accepts `first`, `prefer-<octet>` or a bare octet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "first" {
            return Ok(Self::First);
        }
        let octet = s.strip_prefix("prefer-").unwrap_or(&s);
        octet
            .parse()
            .map(Self::PreferFirstOctet)
            .map_err(|_| format!("Invalid address preference: {s}"))
    }
}

/// Source of the host's interface addresses.
pub trait InterfaceSource: Send + Sync {
    /// Lists addresses of all interfaces, in interface order.
    ///
    /// # Errors
    ///
    /// - `AddressError::Interfaces` - Enumeration failed
    fn addresses(&self) -> Result<Vec<IpAddr>, AddressError>;
}

/// Interfaces reported by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn addresses(&self) -> Result<Vec<IpAddr>, AddressError> {
        local_ip_address::list_afinet_netifas()
            .map(|interfaces| interfaces.into_iter().map(|(_, ip)| ip).collect())
            .map_err(|e| AddressError::Interfaces {
                reason: e.to_string(),
            })
    }
}

/// Fixed address list, for tests and pinned setups.
#[derive(Debug, Clone, Default)]
pub struct FixedInterfaces(pub Vec<IpAddr>);

impl InterfaceSource for FixedInterfaces {
    fn addresses(&self) -> Result<Vec<IpAddr>, AddressError> {
        Ok(self.0.clone())
    }
}

/// Picks an address from `candidates` according to `preference`.
///
/// Loopback and IPv6 entries are never chosen.
///
/// # Errors
///
/// - `AddressError::NoLocalAddressFound` - No non-loopback IPv4 candidate
pub fn choose_address(
    candidates: &[IpAddr],
    preference: AddressPreference,
) -> Result<Ipv4Addr, AddressError> {
    let usable: Vec<Ipv4Addr> = candidates
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(*v4),
            _ => None,
        })
        .collect();

    let preferred = match preference {
        AddressPreference::First => None,
        AddressPreference::PreferFirstOctet(octet) => {
            usable.iter().find(|ip| ip.octets()[0] == octet).copied()
        }
    };
    preferred
        .or_else(|| usable.first().copied())
        .ok_or(AddressError::NoLocalAddressFound)
}

/// Resolves the address players should use to reach this host.
///
/// Not cached: every call re-reads the interfaces so a changed network is
/// picked up on the next request.
#[derive(Clone)]
pub struct LocalAddressResolver {
    source: Arc<dyn InterfaceSource>,
    preference: AddressPreference,
}

impl LocalAddressResolver {
    pub fn new(source: Arc<dyn InterfaceSource>, preference: AddressPreference) -> Self {
        Self { source, preference }
    }

    /// Resolver over the operating system's interfaces.
    pub fn system(preference: AddressPreference) -> Self {
        Self::new(Arc::new(SystemInterfaces), preference)
    }

    /// Resolver that always sees the given addresses.
    pub fn fixed(addresses: Vec<IpAddr>, preference: AddressPreference) -> Self {
        Self::new(Arc::new(FixedInterfaces(addresses)), preference)
    }

    pub fn preference(&self) -> AddressPreference {
        self.preference
    }

    /// # Errors
    ///
    /// - `AddressError::NoLocalAddressFound` - No usable address
    /// - `AddressError::Interfaces` - Enumeration failed
    pub fn resolve(&self) -> Result<Ipv4Addr, AddressError> {
        let candidates = self.source.addresses()?;
        let address = choose_address(&candidates, self.preference)?;
        tracing::trace!(address = %address, "Resolved local address");
        Ok(address)
    }
}

impl fmt::Debug for LocalAddressResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAddressResolver")
            .field("preference", &self.preference)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn test_prefers_192_over_earlier_candidates() {
        let candidates = [v4(127, 0, 0, 1), v4(10, 0, 0, 5), v4(192, 168, 1, 20)];
        assert_eq!(
            choose_address(&candidates, AddressPreference::default()).unwrap(),
            Ipv4Addr::new(192, 168, 1, 20)
        );
        assert_eq!(
            choose_address(&candidates, AddressPreference::First).unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn test_falls_back_to_first_candidate() {
        let candidates = [v4(10, 0, 0, 5), v4(172, 16, 0, 2)];
        assert_eq!(
            choose_address(&candidates, AddressPreference::default()).unwrap(),
            Ipv4Addr::new(10, 0, 0, 5)
        );
    }

    #[test]
    fn test_loopback_and_ipv6_only_fails() {
        let candidates = [v4(127, 0, 0, 1), IpAddr::V6(Ipv6Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))];
        assert_eq!(
            choose_address(&candidates, AddressPreference::default()),
            Err(AddressError::NoLocalAddressFound)
        );
        assert_eq!(
            choose_address(&[], AddressPreference::First),
            Err(AddressError::NoLocalAddressFound)
        );
    }

    #[test]
    fn test_resolver_rereads_source() {
        let resolver = LocalAddressResolver::fixed(vec![v4(192, 168, 0, 7)], AddressPreference::default());
        assert_eq!(resolver.resolve().unwrap(), Ipv4Addr::new(192, 168, 0, 7));
        assert_eq!(resolver.resolve().unwrap(), Ipv4Addr::new(192, 168, 0, 7));
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!("first".parse::<AddressPreference>().unwrap(), AddressPreference::First);
        assert_eq!("prefer-10".parse::<AddressPreference>().unwrap(), AddressPreference::PreferFirstOctet(10));
        assert_eq!("192".parse::<AddressPreference>().unwrap(), AddressPreference::default());
        assert!("prefer-300".parse::<AddressPreference>().is_err());
        assert_eq!(AddressPreference::default().to_string(), "prefer-192");
    }
}
