//! Source-address allow lists
//!
//! A list is a comma-separated mix of single addresses and CIDR blocks, IPv4 or
//! IPv6. An empty list allows nobody. IPv4-mapped IPv6 peers (`::ffff:a.b.c.d`) are
//! matched as IPv4.

use actix_web::HttpRequest;
use callbridge_core::{AppError, AppResult};
use std::net::IpAddr;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AclEntry {
    Addr(IpAddr),
    Net { base: IpAddr, prefix: u8 },
}

impl AclEntry {
    fn parse(raw: &str) -> AppResult<Self> {
        let invalid = || AppError::Config(format!("invalid IP or CIDR: {}", raw));

        match raw.split_once('/') {
            Some((addr, prefix)) => {
                let base = normalize(addr.trim().parse::<IpAddr>().map_err(|_| invalid())?);
                let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
                let max = if base.is_ipv4() { 32 } else { 128 };
                if prefix > max {
                    return Err(invalid());
                }
                Ok(AclEntry::Net {
                    base: mask(base, prefix),
                    prefix,
                })
            }
            None => Ok(AclEntry::Addr(normalize(
                raw.parse::<IpAddr>().map_err(|_| invalid())?,
            ))),
        }
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match self {
            AclEntry::Addr(addr) => *addr == ip,
            AclEntry::Net { base, prefix } => {
                base.is_ipv4() == ip.is_ipv4() && mask(ip, *prefix) == *base
            }
        }
    }
}

fn normalize(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

fn mask(ip: IpAddr, prefix: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let bits = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((u32::from(v4) & bits).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((u128::from(v6) & bits).into())
        }
    }
}

/// Parsed allow list
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    entries: Vec<AclEntry>,
}

impl IpAllowList {
    /// Parse a comma-separated list; blank items are skipped
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first item that is neither an address
    /// nor a CIDR block.
    ///
    /// # Examples
    ///
    /// ```
    /// use callbridge_api::IpAllowList;
    ///
    /// let acl = IpAllowList::parse("127.0.0.1, 10.0.0.0/8").unwrap();
    /// assert!(acl.allows("10.1.2.3".parse().unwrap()));
    /// assert!(!acl.allows("192.168.0.1".parse().unwrap()));
    /// ```
    pub fn parse(list: &str) -> AppResult<Self> {
        let entries = list
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(AclEntry::parse)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn allows(&self, ip: IpAddr) -> bool {
        let ip = normalize(ip);
        self.entries.iter().any(|entry| entry.contains(ip))
    }

    /// Check the TCP peer of `req`; forwarded headers are not trusted
    pub fn allows_peer(&self, req: &HttpRequest) -> bool {
        let Some(peer) = req.peer_addr() else {
            warn!(path = %req.path(), "ACL check without a peer address");
            return false;
        };
        if self.entries.is_empty() {
            warn!(peer = %peer.ip(), "ACL denied (empty allow list)");
            return false;
        }
        let allowed = self.allows(peer.ip());
        if allowed {
            debug!(peer = %peer.ip(), "ACL allowed");
        } else {
            warn!(peer = %peer.ip(), path = %req.path(), "ACL denied");
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_list_denies_everyone() {
        let acl = IpAllowList::parse(" , ").unwrap();
        assert!(acl.is_empty());
        assert!(!acl.allows(ip("127.0.0.1")));
    }

    #[test]
    fn test_single_addresses_and_blocks() {
        let acl = IpAllowList::parse("127.0.0.1,192.168.10.0/24,2001:db8::/32").unwrap();
        assert_eq!(acl.len(), 3);
        assert!(acl.allows(ip("127.0.0.1")));
        assert!(!acl.allows(ip("127.0.0.2")));
        assert!(acl.allows(ip("192.168.10.254")));
        assert!(!acl.allows(ip("192.168.11.1")));
        assert!(acl.allows(ip("2001:db8:1::5")));
        assert!(!acl.allows(ip("2001:db9::1")));
    }

    #[test]
    fn test_mapped_ipv4_peer() {
        let acl = IpAllowList::parse("10.0.0.0/8").unwrap();
        assert!(acl.allows(ip("::ffff:10.20.30.40")));
    }

    #[test]
    fn test_allow_all_blocks() {
        let acl = IpAllowList::parse("0.0.0.0/0,::/0").unwrap();
        assert!(acl.allows(ip("203.0.113.9")));
        assert!(acl.allows(ip("2001:db8::9")));
    }

    #[test]
    fn test_unaligned_block_is_masked() {
        let acl = IpAllowList::parse("172.16.5.9/16").unwrap();
        assert!(acl.allows(ip("172.16.200.1")));
    }

    #[test]
    fn test_invalid_items() {
        assert!(matches!(
            IpAllowList::parse("127.0.0.1,localhost"),
            Err(AppError::Config(_))
        ));
        assert!(IpAllowList::parse("10.0.0.0/33").is_err());
        assert!(IpAllowList::parse("10.0.0.0/x").is_err());
    }
}
