// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! Addressing types used as DRKey entity identifiers and derivation inputs.

use std::{
    fmt::{Debug, Display},
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

const ASN_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;
/// Largest AS number that is written in decimal (BGP range).
const MAX_BGP_ASN: u64 = u32::MAX as u64;

/// ISD (Isolation Domain) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Isd(pub u16);

/// ASN (Autonomous System Number) identifier.
/// Maximum size is 48 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Asn(pub u64);

impl Asn {
    /// Creates a new ASN, truncating to 48 bits.
    pub fn new(value: u64) -> Self {
        Asn(value & ASN_MASK)
    }
}

impl Display for Asn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 <= MAX_BGP_ASN {
            return write!(f, "{}", self.0);
        }
        write!(
            f,
            "{:x}:{:x}:{:x}",
            (self.0 >> 32) & 0xffff,
            (self.0 >> 16) & 0xffff,
            self.0 & 0xffff
        )
    }
}

/// ISD-AS identifier of a network domain.
///
/// DRKey treats the value as an opaque 64-bit entity identifier: the upper 16 bits are the ISD,
/// the lower 48 bits the AS number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct IsdAsn(pub u64);

impl IsdAsn {
    /// Creates a new ISD-AS identifier from the given ISD and ASN.
    pub fn new(isd: Isd, asn: Asn) -> Self {
        IsdAsn(((isd.0 as u64) << 48) | (asn.0 & ASN_MASK))
    }

    /// Returns the raw 64-bit value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the ISD part.
    pub fn isd(&self) -> Isd {
        Isd((self.0 >> 48) as u16)
    }

    /// Returns the ASN part.
    pub fn asn(&self) -> Asn {
        Asn(self.0 & ASN_MASK)
    }

    /// Returns true if either the ISD or the AS part is the wildcard value 0.
    ///
    /// Wildcard identifiers cannot name a DRKey entity.
    pub fn is_wildcard(&self) -> bool {
        self.isd().0 == 0 || self.asn().0 == 0
    }
}

impl From<u64> for IsdAsn {
    fn from(value: u64) -> Self {
        IsdAsn(value)
    }
}

impl Display for IsdAsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.isd().0, self.asn())
    }
}

impl Debug for IsdAsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Error returned when parsing an ISD-AS string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ISD-AS {input:?}: {reason}")]
pub struct ParseIsdAsnError {
    input: String,
    reason: &'static str,
}

impl FromStr for IsdAsn {
    type Err = ParseIsdAsnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| {
            ParseIsdAsnError {
                input: s.to_string(),
                reason,
            }
        };

        let (isd, asn) = s.split_once('-').ok_or_else(|| err("missing '-' separator"))?;
        let isd: u16 = isd.parse().map_err(|_| err("ISD is not a 16-bit number"))?;

        let asn = if asn.contains(':') {
            let groups: Vec<&str> = asn.split(':').collect();
            if groups.len() != 3 {
                return Err(err("AS number must have three ':' separated groups"));
            }
            groups.iter().try_fold(0u64, |acc, group| {
                if group.is_empty() || group.len() > 4 {
                    return Err(err("AS group must have 1 to 4 hex digits"));
                }
                let group =
                    u16::from_str_radix(group, 16).map_err(|_| err("AS group is not hex"))?;
                Ok((acc << 16) | group as u64)
            })?
        } else {
            let asn: u64 = asn.parse().map_err(|_| err("AS number is not decimal"))?;
            if asn > MAX_BGP_ASN {
                return Err(err("decimal AS number exceeds 32 bits"));
            }
            asn
        };

        Ok(IsdAsn::new(Isd(isd), Asn(asn)))
    }
}

/// Host address types as encoded in DRKey derivation inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostAddrType {
    /// IPv4 address.
    Ipv4 = 1,
    /// IPv6 address.
    Ipv6 = 2,
    /// SCION service address.
    Svc = 3,
}

/// End host address used as DRKey derivation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostAddr {
    /// IPv4 address.
    Ipv4(Ipv4Addr),
    /// IPv6 address.
    Ipv6(Ipv6Addr),
    /// SCION service address.
    Svc(u16),
}

impl HostAddr {
    /// Returns the address type.
    pub fn addr_type(&self) -> HostAddrType {
        match self {
            HostAddr::Ipv4(_) => HostAddrType::Ipv4,
            HostAddr::Ipv6(_) => HostAddrType::Ipv6,
            HostAddr::Svc(_) => HostAddrType::Svc,
        }
    }

    /// Returns the packed network-order representation of the address.
    pub fn pack(&self) -> Vec<u8> {
        match self {
            HostAddr::Ipv4(v4) => v4.octets().to_vec(),
            HostAddr::Ipv6(v6) => v6.octets().to_vec(),
            HostAddr::Svc(svc) => svc.to_be_bytes().to_vec(),
        }
    }
}

impl From<IpAddr> for HostAddr {
    fn from(value: IpAddr) -> Self {
        match value {
            IpAddr::V4(v4) => HostAddr::Ipv4(v4),
            IpAddr::V6(v6) => HostAddr::Ipv6(v6),
        }
    }
}

impl Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostAddr::Ipv4(v4) => write!(f, "{v4}"),
            HostAddr::Ipv6(v6) => write!(f, "{v6}"),
            HostAddr::Svc(svc) => write!(f, "svc:{svc:#06x}"),
        }
    }
}
