use super::address::Address;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// A resolved egress target: an address, a port, and a transport tag. UDP
/// relay is out of scope (§1 Non-goals): the SOCKS5 listener rejects UDP
/// ASSOCIATE by command byte before a destination is ever built, so every
/// `Destination` constructed anywhere in this crate carries `Transport::Tcp`;
/// `Udp` exists only to keep this type's shape matching the data model in
/// SPEC_FULL.md §3 ("each plus a transport tag (tcp/udp; only tcp is used)").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: Address,
    pub port: u16,
    pub transport: Transport,
}

impl Destination {
    pub fn new(address: Address, port: u16, transport: Transport) -> Self {
        Self { address, port, transport }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}
