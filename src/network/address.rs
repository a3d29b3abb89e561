use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Mask-wire address type tags. These are distinct from the SOCKS5 address
/// type bytes (0x01/0x03/0x04) -- see `crate::socks::wire` for those.
pub const MASK_ADDR_IPV4: u8 = 0x01;
pub const MASK_ADDR_DOMAIN: u8 = 0x02;
pub const MASK_ADDR_IPV6: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip) => write!(f, "{ip}"),
            Address::Ipv6(ip) => write!(f, "{ip}"),
            Address::Domain(d) => write!(f, "{d}"),
        }
    }
}
