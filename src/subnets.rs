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

use log::debug;
use serde::Serialize;

use crate::cidr::Cidr;
use crate::errors::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NetworkPair {
    pub private: Cidr,
    pub public: Cidr,
}

/// The blocks a VPC is divided into before per-zone subnets are carved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SplitOutput {
    pub standard: NetworkPair,
    pub edge: Option<NetworkPair>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ZoneSubnet {
    pub zone: String,
    pub cidr: Cidr,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VpcPlan {
    pub private: Vec<ZoneSubnet>,
    pub public: Vec<ZoneSubnet>,
    pub edge_private: Vec<ZoneSubnet>,
    pub edge_public: Vec<ZoneSubnet>,
}

/// Divides a VPC block into private and public networks, and into edge
/// networks when edge zones are requested.
///
/// The private network is the first half of the block and the public network
/// the second. Edge zones take the second half of the public network, split
/// again into edge private and edge public. Single-zone layouts only use the
/// first half of each network so the rest stays free for later expansion.
pub fn split_networks(cidr: &Cidr, num_zones: usize, num_edge_zones: usize) -> Result<SplitOutput> {
    let network = cidr.network();
    let mut private = network.subnet(1, 0)?;
    let mut public = network.subnet(1, 1)?;

    let mut edge = None;
    if num_edge_zones > 0 {
        let shared_edge = public.subnet(1, 1)?;
        public = public.subnet(1, 0)?;
        let mut pair = NetworkPair {
            private: shared_edge.subnet(1, 0)?,
            public: shared_edge.subnet(1, 1)?,
        };
        if num_edge_zones == 1 {
            pair = NetworkPair {
                private: pair.private.subnet(1, 0)?,
                public: pair.public.subnet(1, 0)?,
            };
        }
        edge = Some(pair);
    }

    if num_zones == 1 {
        private = private.subnet(1, 0)?;
        public = public.subnet(1, 0)?;
    }

    debug!(
        "split {} for {} zones and {} edge zones: private {} public {}",
        network, num_zones, num_edge_zones, private, public
    );
    Ok(SplitOutput {
        standard: NetworkPair { private, public },
        edge,
    })
}

/// Carves one subnet per zone out of `network`, extending the prefix by
/// just enough bits to number every zone.
pub fn zone_subnets(network: &Cidr, zones: &[String]) -> Result<Vec<ZoneSubnet>> {
    let newbits = bits_for(zones.len());
    zones
        .iter()
        .enumerate()
        .map(|(i, zone)| {
            Ok(ZoneSubnet {
                zone: zone.clone(),
                cidr: network.subnet(newbits, i as u128)?,
            })
        })
        .collect()
}

pub fn plan_vpc(cidr: &Cidr, zones: &[String], edge_zones: &[String]) -> Result<VpcPlan> {
    let split = split_networks(cidr, zones.len(), edge_zones.len())?;
    let mut plan = VpcPlan {
        private: zone_subnets(&split.standard.private, zones)?,
        public: zone_subnets(&split.standard.public, zones)?,
        ..Default::default()
    };
    if let Some(edge) = split.edge {
        plan.edge_private = zone_subnets(&edge.private, edge_zones)?;
        plan.edge_public = zone_subnets(&edge.public, edge_zones)?;
    }
    Ok(plan)
}

/// ceil(log2(n)), with zero for zero or one zone.
fn bits_for(n: usize) -> u8 {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as u8
    }
}
