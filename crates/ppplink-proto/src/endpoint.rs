//! Addressing for PPPoE peers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub const fn new(a: u8, b: u8, c: u8, d: u8, e: u8, f: u8) -> Self {
        Self([a, b, c, d, e, f])
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| format!("MAC address too short: {}", s))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid MAC address octet {:?} in {}", part, s))?;
        }
        if parts.next().is_some() {
            return Err(format!("MAC address too long: {}", s));
        }
        Ok(Self(octets))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

/// A PPPoE peer: link-layer address plus session id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub mac: MacAddr,
    pub session_id: u16,
}

impl Endpoint {
    pub fn new(mac: MacAddr, session_id: u16) -> Self {
        Self { mac, session_id }
    }

    /// Network name, always "pppoe"
    pub fn network(&self) -> &'static str {
        "pppoe"
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:x}", self.network(), self.mac, self.session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "00:1a:2B:3c:4d:5e".parse().unwrap();
        assert_eq!(mac, MacAddr::new(0x00, 0x1a, 0x2b, 0x3c, 0x4d, 0x5e));
        assert_eq!(mac.to_string(), "00:1a:2b:3c:4d:5e");

        assert!("00:1a:2b".parse::<MacAddr>().is_err());
        assert!("00:1a:2b:3c:4d:5e:6f".parse::<MacAddr>().is_err());
        assert!("zz:1a:2b:3c:4d:5e".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_broadcast() {
        assert!(MacAddr::BROADCAST.is_broadcast());
        assert!(!MacAddr::default().is_broadcast());
    }

    #[test]
    fn test_endpoint_display() {
        let ep = Endpoint::new(MacAddr::new(2, 0, 0, 0, 0, 1), 0x1234);
        assert_eq!(ep.to_string(), "pppoe:02:00:00:00:00:01:1234");
        assert_eq!(ep.network(), "pppoe");
    }
}
