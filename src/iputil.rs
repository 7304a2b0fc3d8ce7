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

//! Prefix aggregation helpers.
//!
//! `merge_prefixes` collapses any list of prefixes into the smallest set of
//! CIDR blocks covering the same addresses, e.g. for firewall source ranges
//! or route tables built from many host entries.

use std::net::IpAddr;
use std::sync::LazyLock;

use log::debug;
use regex::Regex;

use crate::cidr::{to_bits, width, Cidr};
use crate::constants::PREFIX_LIST_SEPARATOR;
use crate::errors::{Error, Result};

/// Returns the minimal sorted set of prefix blocks covering exactly the
/// union of `prefixes`. IPv4 blocks come before IPv6 blocks.
pub fn merge_prefixes(prefixes: &[Cidr]) -> Vec<Cidr> {
    let mut v4 = vec![];
    let mut v6 = vec![];
    for p in prefixes {
        if p.is_ipv4() {
            v4.push(p.range());
        } else {
            v6.push(p.range());
        }
    }

    let mut merged = vec![];
    for (ranges, ipv4) in [(v4, true), (v6, false)] {
        let bits = if ipv4 { 32 } else { 128 };
        for (first, last) in coalesce(ranges) {
            merged.extend(span_bits(first, last, bits, ipv4));
        }
    }
    debug!(
        "merged {} prefixes into {} blocks",
        prefixes.len(),
        merged.len()
    );
    merged
}

/// Minimal prefix blocks covering the inclusive range `start..=end`.
pub fn span_range(start: IpAddr, end: IpAddr) -> Result<Vec<Cidr>> {
    if start.is_ipv4() != end.is_ipv4() {
        return Err(Error::FamilyMismatch(start, end));
    }
    let (first, last) = (to_bits(&start), to_bits(&end));
    if first > last {
        return Err(Error::InvalidRange { start, end });
    }
    Ok(span_bits(first, last, width(&start), start.is_ipv4()))
}

static SEPARATOR: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(PREFIX_LIST_SEPARATOR));

/// Parses a comma and/or whitespace separated list of prefixes. Bare
/// addresses are accepted as host prefixes.
pub fn parse_prefix_list(input: &str) -> Result<Vec<Cidr>> {
    let re = SEPARATOR.as_ref().map_err(|e| Error::Pattern(e.clone()))?;
    re.split(input)
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<Cidr>())
        .collect()
}

/// Sorts ranges and joins the ones that overlap or touch.
fn coalesce(mut ranges: Vec<(u128, u128)>) -> Vec<(u128, u128)> {
    ranges.sort_unstable();
    let mut out: Vec<(u128, u128)> = Vec::with_capacity(ranges.len());
    for (first, last) in ranges {
        match out.last_mut() {
            Some((_, cur_last)) if first <= cur_last.saturating_add(1) => {
                if last > *cur_last {
                    *cur_last = last;
                }
            }
            _ => out.push((first, last)),
        }
    }
    out
}

fn span_bits(mut start: u128, end: u128, bits: u8, ipv4: bool) -> Vec<Cidr> {
    let mut blocks = vec![];
    loop {
        let align = start.trailing_zeros().min(bits as u32);
        let fit = match (end - start).checked_add(1) {
            Some(count) => 127 - count.leading_zeros(),
            None => 128,
        };
        let host_bits = align.min(fit);
        blocks.push(Cidr::from_parts(start, bits - host_bits as u8, ipv4));

        let block_last = match 1u128.checked_shl(host_bits) {
            Some(size) => start + (size - 1),
            None => u128::MAX,
        };
        if block_last >= end {
            break;
        }
        start = block_last + 1;
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::{merge_prefixes, parse_prefix_list, span_range};
    use crate::cidr::Cidr;
    use crate::errors::Error;

    fn cidrs(list: &[&str]) -> Vec<Cidr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn strings(list: Vec<Cidr>) -> Vec<String> {
        list.into_iter().map(|c| c.to_string()).collect()
    }

    #[test]
    pub fn test_adjacent_host_prefixes_merge() {
        let merged = merge_prefixes(&cidrs(&["10.0.0.1/32", "10.0.0.0/32"]));
        assert_eq!(strings(merged), vec!["10.0.0.0/31"]);
    }

    #[test]
    pub fn test_sibling_blocks_merge_upwards() {
        let merged = merge_prefixes(&cidrs(&[
            "10.0.0.0/26",
            "10.0.0.64/26",
            "10.0.0.128/25",
            "10.0.1.0/24",
        ]));
        assert_eq!(strings(merged), vec!["10.0.0.0/23"]);
    }

    #[test]
    pub fn test_contained_prefixes_are_absorbed() {
        let merged = merge_prefixes(&cidrs(&["10.0.0.0/16", "10.0.3.0/24", "10.0.0.5"]));
        assert_eq!(strings(merged), vec!["10.0.0.0/16"]);
    }

    #[test]
    pub fn test_unaligned_union_yields_several_blocks() {
        let merged = merge_prefixes(&cidrs(&["10.0.0.1/32", "10.0.0.2/31"]));
        assert_eq!(strings(merged), vec!["10.0.0.1/32", "10.0.0.2/31"]);
    }

    #[test]
    pub fn test_disjoint_prefixes_stay_apart_and_sorted() {
        let merged = merge_prefixes(&cidrs(&[
            "209.85.204.0/22",
            "35.191.0.0/16",
            "209.85.152.0/22",
        ]));
        assert_eq!(
            strings(merged),
            vec!["35.191.0.0/16", "209.85.152.0/22", "209.85.204.0/22"]
        );
    }

    #[test]
    pub fn test_host_bits_are_ignored() {
        let merged = merge_prefixes(&cidrs(&["10.0.0.7/24", "10.0.1.9/24"]));
        assert_eq!(strings(merged), vec!["10.0.0.0/23"]);
    }

    #[test]
    pub fn test_families_are_merged_separately() {
        let merged = merge_prefixes(&cidrs(&[
            "fd00::1/128",
            "10.0.0.0/25",
            "fd00::/128",
            "10.0.0.128/25",
        ]));
        assert_eq!(strings(merged), vec!["10.0.0.0/24", "fd00::/127"]);
    }

    #[test]
    pub fn test_full_address_spaces_do_not_overflow() {
        let merged = merge_prefixes(&cidrs(&["::/1", "8000::/1", "0.0.0.0/1", "128.0.0.0/1"]));
        assert_eq!(strings(merged), vec!["0.0.0.0/0", "::/0"]);
        let merged = merge_prefixes(&cidrs(&["::/0", "ffff::1"]));
        assert_eq!(strings(merged), vec!["::/0"]);
    }

    #[test]
    pub fn test_empty_input_gives_empty_output() {
        assert!(merge_prefixes(&[]).is_empty());
    }

    #[test]
    pub fn test_span_range_covers_inclusive_range() {
        let blocks = span_range("10.0.0.1".parse().unwrap(), "10.0.0.6".parse().unwrap()).unwrap();
        assert_eq!(
            strings(blocks),
            vec!["10.0.0.1/32", "10.0.0.2/31", "10.0.0.4/31", "10.0.0.6/32"]
        );
        let blocks =
            span_range("10.0.0.0".parse().unwrap(), "10.0.0.255".parse().unwrap()).unwrap();
        assert_eq!(strings(blocks), vec!["10.0.0.0/24"]);
    }

    #[test]
    pub fn test_span_range_rejects_bad_input() {
        assert!(matches!(
            span_range("10.0.0.1".parse().unwrap(), "::1".parse().unwrap()),
            Err(Error::FamilyMismatch(..))
        ));
        assert!(matches!(
            span_range("10.0.0.9".parse().unwrap(), "10.0.0.1".parse().unwrap()),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    pub fn test_parse_prefix_list_accepts_commas_and_whitespace() {
        let parsed = parse_prefix_list("35.191.0.0/16,209.85.152.0/22\n 209.85.204.0/22 ,").unwrap();
        assert_eq!(
            strings(parsed),
            vec!["35.191.0.0/16", "209.85.152.0/22", "209.85.204.0/22"]
        );
        assert!(parse_prefix_list("   ").unwrap().is_empty());
        assert!(parse_prefix_list("10.0.0.0/8, nope").is_err());
    }

    #[test]
    pub fn test_parse_prefix_list_rejects_semicolons() {
        assert!(parse_prefix_list("10.0.0.0/8;192.168.0.0/16").is_err());
        assert_eq!(
            strings(parse_prefix_list("10.0.0.0/8 192.168.0.0/16").unwrap()),
            vec!["10.0.0.0/8", "192.168.0.0/16"]
        );
    }
}
