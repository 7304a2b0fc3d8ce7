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

use std::net::IpAddr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid CIDR {input:?}: {reason}")]
    InvalidCidr { input: String, reason: String },

    #[error("prefix length {prefix_len} exceeds {max} bits")]
    PrefixTooLong { prefix_len: u32, max: u8 },

    #[error("cannot extend /{prefix_len} by {newbits} bits: only {max} bits available")]
    SubnetOutOfRange { prefix_len: u8, newbits: u8, max: u8 },

    #[error("subnet number {num} does not fit in {newbits} bits for {parent}")]
    SubnetNumberTooLarge {
        parent: String,
        newbits: u8,
        num: u128,
    },

    #[error("address family mismatch between {0} and {1}")]
    FamilyMismatch(IpAddr, IpAddr),

    #[error("invalid range: {start} is after {end}")]
    InvalidRange { start: IpAddr, end: IpAddr },

    #[error("invalid interval configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl Error {
    pub(crate) fn invalid_cidr(input: &str, reason: impl Into<String>) -> Self {
        Error::InvalidCidr {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    pub fn test_invalid_cidr_message_includes_input_and_reason() {
        let err = Error::invalid_cidr("10.0.0.0/40", "prefix out of range");
        assert_eq!(
            err.to_string(),
            "invalid CIDR \"10.0.0.0/40\": prefix out of range"
        );
    }

    #[test]
    pub fn test_subnet_out_of_range_message() {
        let err = Error::SubnetOutOfRange {
            prefix_len: 30,
            newbits: 4,
            max: 32,
        };
        assert_eq!(
            err.to_string(),
            "cannot extend /30 by 4 bits: only 32 bits available"
        );
    }
}
