// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

const IPV4_BITS: u8 = 32;
const IPV6_BITS: u8 = 128;

/// An IP prefix such as `10.0.0.0/16` or `fd00::/48`.
///
/// The address is stored as given, host bits included, so that callers can
/// tell `10.0.0.1/16` apart from `10.0.0.0/16`. Every arithmetic operation
/// works on the network address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cidr {
    addr: IpAddr,
    prefix_len: u8,
}

impl Cidr {
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = width(&addr);
        if prefix_len > max {
            return Err(Error::PrefixTooLong {
                prefix_len: prefix_len as u32,
                max,
            });
        }
        Ok(Cidr { addr, prefix_len })
    }

    /// Host prefix (/32 or /128) for a single address.
    pub fn host(addr: IpAddr) -> Self {
        Cidr {
            addr,
            prefix_len: width(&addr),
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn max_prefix_len(&self) -> u8 {
        width(&self.addr)
    }

    pub fn is_ipv4(&self) -> bool {
        self.addr.is_ipv4()
    }

    pub fn is_ipv6(&self) -> bool {
        self.addr.is_ipv6()
    }

    pub fn network(&self) -> Cidr {
        Cidr {
            addr: self.first(),
            prefix_len: self.prefix_len,
        }
    }

    pub fn is_network_address(&self) -> bool {
        self.addr == self.first()
    }

    pub fn first(&self) -> IpAddr {
        from_bits(self.range().0, self.is_ipv4())
    }

    pub fn last(&self) -> IpAddr {
        from_bits(self.range().1, self.is_ipv4())
    }

    /// Number of addresses in the block, saturating at `u128::MAX` for `::/0`.
    pub fn host_count(&self) -> u128 {
        let host_bits = (self.max_prefix_len() - self.prefix_len) as u32;
        1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
    }

    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        if addr.is_ipv4() != self.is_ipv4() {
            return false;
        }
        let (first, last) = self.range();
        let bits = to_bits(&addr);
        first <= bits && bits <= last
    }

    pub fn contains(&self, other: &Cidr) -> bool {
        other.prefix_len >= self.prefix_len && self.contains_addr(other.first())
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        if self.is_ipv4() != other.is_ipv4() {
            return false;
        }
        let (a_first, a_last) = self.range();
        let (b_first, b_last) = other.range();
        a_first <= b_last && b_first <= a_last
    }

    /// Carves a subnet out of this network by extending the prefix by
    /// `newbits` and selecting block `num`, the same numbering as
    /// terraform's `cidrsubnet`.
    pub fn subnet(&self, newbits: u8, num: u128) -> Result<Cidr> {
        let max = self.max_prefix_len();
        let new_prefix = self.prefix_len as u32 + newbits as u32;
        if new_prefix > max as u32 {
            return Err(Error::SubnetOutOfRange {
                prefix_len: self.prefix_len,
                newbits,
                max,
            });
        }
        if num.checked_shr(newbits as u32).unwrap_or(0) != 0 {
            return Err(Error::SubnetNumberTooLarge {
                parent: self.network().to_string(),
                newbits,
                num,
            });
        }
        let shift = max as u32 - new_prefix;
        let offset = num.checked_shl(shift).unwrap_or(0);
        Ok(Cidr {
            addr: from_bits(self.range().0 | offset, self.is_ipv4()),
            prefix_len: new_prefix as u8,
        })
    }

    /// Inclusive `(first, last)` address bits of the block.
    pub(crate) fn range(&self) -> (u128, u128) {
        let host = host_mask(self.prefix_len, self.max_prefix_len());
        let first = to_bits(&self.addr) & !host;
        (first, first | host)
    }

    pub(crate) fn from_parts(bits: u128, prefix_len: u8, ipv4: bool) -> Cidr {
        Cidr {
            addr: from_bits(bits, ipv4),
            prefix_len,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr = IpAddr::from_str(addr)
            .map_err(|_| Error::invalid_cidr(s, format!("invalid IP address {:?}", addr)))?;
        match prefix {
            None => Ok(Cidr::host(addr)),
            Some(p) => {
                let prefix_len = p
                    .parse::<u8>()
                    .map_err(|_| Error::invalid_cidr(s, format!("invalid prefix length {:?}", p)))?;
                Cidr::new(addr, prefix_len).map_err(|e| Error::invalid_cidr(s, e.to_string()))
            }
        }
    }
}

impl TryFrom<String> for Cidr {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Cidr> for String {
    fn from(value: Cidr) -> Self {
        value.to_string()
    }
}

pub(crate) fn width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => IPV4_BITS,
        IpAddr::V6(_) => IPV6_BITS,
    }
}

pub(crate) fn to_bits(addr: &IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(*v4) as u128,
        IpAddr::V6(v6) => u128::from(*v6),
    }
}

pub(crate) fn from_bits(bits: u128, ipv4: bool) -> IpAddr {
    if ipv4 {
        IpAddr::V4(Ipv4Addr::from(bits as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(bits))
    }
}

pub(crate) fn host_mask(prefix_len: u8, width: u8) -> u128 {
    let ones = if width == IPV4_BITS {
        u32::MAX as u128
    } else {
        u128::MAX
    };
    ones.checked_shr(prefix_len as u32).unwrap_or(0)
}
