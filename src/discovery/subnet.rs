//! IPv4 subnets

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::DiscoveryError;

/// An IPv4 network in CIDR form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix: u8,
}

impl Subnet {
    /// The network containing `address`; host bits are masked off
    pub fn new(address: Ipv4Addr, prefix: u8) -> Result<Self, DiscoveryError> {
        if prefix > 32 {
            return Err(DiscoveryError::InvalidSubnet(format!(
                "{}/{}: prefix out of range",
                address, prefix
            )));
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix));
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn contains(&self, address: Ipv4Addr) -> bool {
        u32::from(address) & mask(self.prefix) == u32::from(self.network)
    }

    /// Usable host addresses, excluding network and broadcast for /30 and wider
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let base = u32::from(self.network);
        let size = 1u64 << (32 - u32::from(self.prefix));
        let (first, last) = if self.prefix >= 31 {
            (base as u64, base as u64 + size - 1)
        } else {
            (base as u64 + 1, base as u64 + size - 2)
        };
        (first..=last).map(|ip| Ipv4Addr::from(ip as u32))
    }

    pub fn host_count(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix));
        if self.prefix >= 31 {
            size
        } else {
            size - 2
        }
    }

    /// The /24 around this machine's primary IPv4 address
    pub fn local() -> Result<Self, DiscoveryError> {
        match local_ip_address::local_ip() {
            Ok(IpAddr::V4(ip)) => Self::new(ip, 24),
            Ok(IpAddr::V6(ip)) => Err(DiscoveryError::LocalAddress(format!(
                "no IPv4 address (found {})",
                ip
            ))),
            Err(e) => Err(DiscoveryError::LocalAddress(e.to_string())),
        }
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Subnet {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DiscoveryError::InvalidSubnet(s.to_string());
        let (address, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(address, prefix)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
