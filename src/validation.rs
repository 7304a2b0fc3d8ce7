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

//! Validation of the cluster networking section.
//!
//! Every problem found is reported as a [`FieldError`]; validation never
//! stops at the first one.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::cidr::Cidr;
use crate::constants::{
    DOCKER_BRIDGE_CIDR, IPV6_HOST_PREFIX, NETWORK_TYPE_KURYR, NETWORK_TYPE_OPENSHIFT_SDN,
    PLUGINS_USING_HOST_PREFIX,
};

const MIN_IPV6_SERVICE_PREFIX: u8 = 108;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Networking {
    #[serde(default)]
    pub network_type: String,
    #[serde(default)]
    pub machine_network: Vec<MachineNetworkEntry>,
    #[serde(default)]
    pub service_network: Vec<Cidr>,
    #[serde(default)]
    pub cluster_network: Vec<ClusterNetworkEntry>,
    #[serde(default, rename = "apiVIPs")]
    pub api_vips: Vec<String>,
    #[serde(default, rename = "ingressVIPs")]
    pub ingress_vips: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MachineNetworkEntry {
    pub cidr: Cidr,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    pub cidr: Cidr,
    #[serde(default)]
    pub host_prefix: i32,
}

/// Target platform of the install; decides which address families are
/// accepted and how strictly the Docker bridge is avoided.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Platform {
    /// Libvirt hosts run a Docker bridge, so overlapping it is an error.
    Libvirt,
    #[value(name = "baremetal")]
    BareMetal,
    #[value(name = "vsphere")]
    VSphere,
    #[value(name = "openstack")]
    OpenStack,
    Ovirt,
    Nutanix,
    None,
    External,
    #[value(name = "azurestack")]
    AzureStack,
    #[default]
    Other,
}

impl Platform {
    pub fn supports_dual_stack(&self) -> bool {
        matches!(
            self,
            Platform::BareMetal
                | Platform::VSphere
                | Platform::OpenStack
                | Platform::Ovirt
                | Platform::Nutanix
                | Platform::None
                | Platform::External
        )
    }

    /// Whether an IPv6 network may be listed before the IPv4 one.
    pub fn allows_ipv6_primary(&self) -> bool {
        matches!(
            self,
            Platform::BareMetal | Platform::VSphere | Platform::OpenStack
        )
    }

    pub fn supports_single_stack_ipv6(&self) -> bool {
        self.supports_dual_stack()
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorKind {
    Required,
    Invalid,
}

/// Strings render quoted and numbers bare, as in `Invalid value: 56`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FieldError {
    pub kind: FieldErrorKind,
    pub path: String,
    pub value: Option<serde_json::Value>,
    pub detail: String,
}

impl FieldError {
    fn required(path: impl Into<String>, detail: impl Into<String>) -> Self {
        FieldError {
            kind: FieldErrorKind::Required,
            path: path.into(),
            value: None,
            detail: detail.into(),
        }
    }

    fn invalid(path: impl Into<String>, value: impl Serialize, detail: impl Into<String>) -> Self {
        FieldError {
            kind: FieldErrorKind::Invalid,
            path: path.into(),
            value: serde_json::to_value(value).ok(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.value) {
            (FieldErrorKind::Invalid, Some(value)) => write!(
                f,
                "{}: Invalid value: {}: {}",
                self.path, value, self.detail
            ),
            (FieldErrorKind::Invalid, None) => {
                write!(f, "{}: Invalid value: {}", self.path, self.detail)
            }
            (FieldErrorKind::Required, _) => {
                write!(f, "{}: Required value: {}", self.path, self.detail)
            }
        }
    }
}

pub fn validate_networking(n: &Networking, platform: Platform) -> Vec<FieldError> {
    let root = "networking";
    let mut errs = vec![];

    match n.network_type.as_str() {
        "" => errs.push(FieldError::required(
            format!("{}.networkType", root),
            "network provider type required",
        )),
        NETWORK_TYPE_KURYR => errs.push(FieldError::invalid(
            format!("{}.networkType", root),
            &n.network_type,
            "networkType Kuryr is not supported on OpenShift later than 4.14",
        )),
        NETWORK_TYPE_OPENSHIFT_SDN => errs.push(FieldError::invalid(
            format!("{}.networkType", root),
            &n.network_type,
            "networkType OpenShiftSDN is deprecated, please use OVNKubernetes",
        )),
        _ => {}
    }

    if n.machine_network.is_empty() {
        errs.push(FieldError::required(
            format!("{}.machineNetwork", root),
            "at least one machine network is required",
        ));
    }
    for (i, mn) in n.machine_network.iter().enumerate() {
        let path = format!("{}.machineNetwork[{}]", root, i);
        if let Some(detail) = subnet_cidr_problem(&mn.cidr) {
            errs.push(FieldError::invalid(&path, mn.cidr, detail));
        }
        for (j, other) in n.machine_network[..i].iter().enumerate() {
            if mn.cidr.overlaps(&other.cidr) {
                errs.push(FieldError::invalid(
                    &path,
                    mn.cidr,
                    format!("machine network must not overlap with machine network {}", j),
                ));
            }
        }
    }

    if n.service_network.is_empty() {
        errs.push(FieldError::required(
            format!("{}.serviceNetwork", root),
            "a service network is required",
        ));
    }
    for (i, sn) in n.service_network.iter().enumerate() {
        let path = format!("{}.serviceNetwork[{}]", root, i);
        if let Some(detail) = service_cidr_problem(sn) {
            errs.push(FieldError::invalid(&path, sn, detail));
        }
        for mn in &n.machine_network {
            if sn.overlaps(&mn.cidr) {
                errs.push(FieldError::invalid(
                    &path,
                    sn,
                    "service network must not overlap with any of the machine networks",
                ));
            }
        }
        for (j, other) in n.service_network[..i].iter().enumerate() {
            if sn.overlaps(other) {
                errs.push(FieldError::invalid(
                    &path,
                    sn,
                    format!("service network must not overlap with service network {}", j),
                ));
            }
        }
    }

    if n.cluster_network.is_empty() {
        errs.push(FieldError::required(
            format!("{}.clusterNetwork", root),
            "cluster network required",
        ));
    }
    for i in 0..n.cluster_network.len() {
        errs.extend(validate_cluster_network(
            n,
            i,
            &format!("{}.clusterNetwork[{}]", root, i),
        ));
    }

    errs.extend(validate_ip_version(n, platform, root));
    errs.extend(validate_docker_bridge(n, platform, root));
    errs.extend(validate_vips(n, root));
    errs
}

/// Address families found in one list of networks. `primary_ipv6` is set
/// when the first entry is IPv6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Presence {
    ipv4: bool,
    ipv6: bool,
    primary_ipv6: bool,
}

impl Presence {
    fn of(cidrs: &[Cidr]) -> Self {
        let mut p = Presence::default();
        for (i, cidr) in cidrs.iter().enumerate() {
            if cidr.is_ipv6() {
                p.ipv6 = true;
            } else {
                p.ipv4 = true;
            }
            if i == 0 {
                p.primary_ipv6 = cidr.is_ipv6();
            }
        }
        p
    }
}

fn join_cidrs(cidrs: &[Cidr]) -> String {
    cidrs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<String>>()
        .join(", ")
}

/// Checks single-stack IPv6 and dual-stack requests for consistency. The
/// stack is decided by the service networks alone.
fn validate_ip_version(n: &Networking, platform: Platform, root: &str) -> Vec<FieldError> {
    let mut errs = vec![];
    let fields: [(&str, Vec<Cidr>); 3] = [
        (
            "machineNetwork",
            n.machine_network.iter().map(|mn| mn.cidr).collect(),
        ),
        ("serviceNetwork", n.service_network.clone()),
        (
            "clusterNetwork",
            n.cluster_network.iter().map(|cn| cn.cidr).collect(),
        ),
    ];
    let service = Presence::of(&n.service_network);
    let service_path = format!("{}.serviceNetwork", root);

    if service.ipv4 && service.ipv6 {
        if n.service_network.len() != 2 {
            errs.push(FieldError::invalid(
                &service_path,
                join_cidrs(&n.service_network),
                "when installing dual-stack IPv4/IPv6 you must provide two service networks, one for each IP address type",
            ));
        }
        if !platform.supports_dual_stack() {
            errs.push(FieldError::invalid(
                root,
                "DualStack",
                "dual-stack IPv4/IPv6 is not supported for this platform, specify only one type of address",
            ));
        }
        for (field, cidrs) in &fields {
            let presence = Presence::of(cidrs);
            let path = format!("{}.{}", root, field);
            if presence.ipv4 && !presence.ipv6 {
                errs.push(FieldError::invalid(
                    &path,
                    join_cidrs(cidrs),
                    "dual-stack IPv4/IPv6 requires an IPv6 network in this list",
                ));
            } else if presence.ipv6 && !presence.ipv4 {
                errs.push(FieldError::invalid(
                    &path,
                    join_cidrs(cidrs),
                    "dual-stack IPv4/IPv6 requires an IPv4 network in this list",
                ));
            }
            if !platform.allows_ipv6_primary()
                && presence.ipv4
                && presence.ipv6
                && presence.primary_ipv6
            {
                errs.push(FieldError::invalid(
                    &path,
                    join_cidrs(cidrs),
                    "IPv4 addresses must be listed before IPv6 addresses",
                ));
            }
        }
    } else if service.ipv6 {
        if platform == Platform::AzureStack {
            errs.push(FieldError::invalid(
                root,
                "IPv6",
                "Azure Stack does not support IPv6",
            ));
        } else if !platform.supports_single_stack_ipv6() {
            errs.push(FieldError::invalid(
                root,
                "IPv6",
                "single-stack IPv6 is not supported for this platform",
            ));
        }
    } else if service.ipv4 && n.service_network.len() > 1 {
        errs.push(FieldError::invalid(
            &service_path,
            join_cidrs(&n.service_network),
            "only one service network can be specified",
        ));
    }
    errs
}

fn validate_cluster_network(n: &Networking, idx: usize, path: &str) -> Vec<FieldError> {
    let mut errs = vec![];
    let cn = &n.cluster_network[idx];
    let cidr_path = format!("{}.cidr", path);
    let prefix_path = format!("{}.hostPrefix", path);

    if let Some(detail) = subnet_cidr_problem(&cn.cidr) {
        errs.push(FieldError::invalid(&cidr_path, cn.cidr, detail));
    }
    for mn in &n.machine_network {
        if cn.cidr.overlaps(&mn.cidr) {
            errs.push(FieldError::invalid(
                &cidr_path,
                cn.cidr,
                "cluster network must not overlap with any of the machine networks",
            ));
        }
    }
    for (i, sn) in n.service_network.iter().enumerate() {
        if cn.cidr.overlaps(sn) {
            errs.push(FieldError::invalid(
                &cidr_path,
                cn.cidr,
                format!("cluster network must not overlap with service network {}", i),
            ));
        }
    }
    for (i, other) in n.cluster_network[..idx].iter().enumerate() {
        if cn.cidr.overlaps(&other.cidr) {
            errs.push(FieldError::invalid(
                &cidr_path,
                cn.cidr,
                format!("cluster network must not overlap with cluster network {}", i),
            ));
        }
    }

    if cn.host_prefix < 0 {
        errs.push(FieldError::invalid(
            &prefix_path,
            cn.host_prefix,
            "hostPrefix must be positive",
        ));
    }
    // hostPrefix is only checked when the plugin uses it or it was set
    if PLUGINS_USING_HOST_PREFIX.contains(&n.network_type.as_str()) || cn.host_prefix != 0 {
        if cn.host_prefix < cn.cidr.prefix_len() as i32 {
            errs.push(FieldError::invalid(
                &prefix_path,
                cn.host_prefix,
                format!(
                    "cluster network host subnetwork prefix must not be larger size than CIDR {}",
                    cn.cidr
                ),
            ));
        } else if cn.cidr.is_ipv6() && cn.host_prefix != IPV6_HOST_PREFIX {
            errs.push(FieldError::invalid(
                &prefix_path,
                cn.host_prefix,
                "cluster network host subnetwork prefix must be 64 for IPv6 networks",
            ));
        }
    }
    errs
}

fn validate_docker_bridge(n: &Networking, platform: Platform, root: &str) -> Vec<FieldError> {
    let mut errs = vec![];
    let bridge = match Cidr::from_str(DOCKER_BRIDGE_CIDR) {
        Ok(bridge) => bridge,
        Err(_) => return errs,
    };
    let mut check = |path: String, cidr: &Cidr| {
        if !cidr.overlaps(&bridge) {
            return;
        }
        match platform {
            Platform::Libvirt => errs.push(FieldError::invalid(
                path,
                cidr,
                "overlaps with default Docker Bridge subnet",
            )),
            _ => warn!(
                "{}: {} overlaps with default Docker Bridge subnet",
                path, cidr
            ),
        }
    };
    for (i, mn) in n.machine_network.iter().enumerate() {
        check(format!("{}.machineNetwork[{}]", root, i), &mn.cidr);
    }
    for (i, sn) in n.service_network.iter().enumerate() {
        check(format!("{}.serviceNetwork[{}]", root, i), sn);
    }
    for (i, cn) in n.cluster_network.iter().enumerate() {
        check(format!("{}.clusterNetwork[{}]", root, i), &cn.cidr);
    }
    errs
}

fn validate_vips(n: &Networking, root: &str) -> Vec<FieldError> {
    let mut errs = vec![];
    let groups = [("apiVIPs", &n.api_vips), ("ingressVIPs", &n.ingress_vips)];
    for (field, vips) in groups {
        for (i, vip) in vips.iter().enumerate() {
            let path = format!("{}.{}[{}]", root, field, i);
            match IpAddr::from_str(vip) {
                Ok(addr) => {
                    if let Err(detail) = ip_in_machine_network(addr, n) {
                        errs.push(FieldError::invalid(path, vip, detail));
                    }
                }
                Err(_) => errs.push(FieldError::invalid(path, vip, "invalid IP address")),
            }
        }
    }
    errs
}

/// Checks that `addr` lies inside one of the machine networks.
pub fn ip_in_machine_network(addr: IpAddr, n: &Networking) -> Result<(), String> {
    if n.machine_network.iter().any(|mn| mn.cidr.contains_addr(addr)) {
        return Ok(());
    }
    let networks = n
        .machine_network
        .iter()
        .map(|mn| mn.cidr.to_string())
        .collect::<Vec<String>>();
    Err(format!(
        "IP expected to be in one of the machine networks: {}",
        networks.join(",")
    ))
}

fn subnet_cidr_problem(cidr: &Cidr) -> Option<String> {
    if cidr.addr().is_unspecified() && cidr.prefix_len() > 0 {
        return Some("address must be specified".to_string());
    }
    if !cidr.is_network_address() {
        return Some(format!(
            "invalid network address. got {}, expecting {}",
            cidr,
            cidr.network()
        ));
    }
    None
}

fn service_cidr_problem(cidr: &Cidr) -> Option<String> {
    if cidr.is_ipv6() && cidr.prefix_len() < MIN_IPV6_SERVICE_PREFIX {
        return Some(format!(
            "subnet size for IPv6 service network should be /{} or greater",
            MIN_IPV6_SERVICE_PREFIX
        ));
    }
    subnet_cidr_problem(cidr)
}
