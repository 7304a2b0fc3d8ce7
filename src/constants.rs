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

use std::time::Duration;

// Requeue intervals
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_JITTER: f64 = 0.0;

// Installer networking defaults
pub const DEFAULT_MACHINE_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "172.30.0.0/16";
pub const DEFAULT_CLUSTER_CIDR: &str = "10.128.0.0/14";
pub const DEFAULT_HOST_PREFIX: i32 = 23;
pub(crate) const DOCKER_BRIDGE_CIDR: &str = "172.17.0.0/16";
pub(crate) const IPV6_HOST_PREFIX: i32 = 64;

// Network plugins
pub(crate) const NETWORK_TYPE_OVN_KUBERNETES: &str = "OVNKubernetes";
pub(crate) const NETWORK_TYPE_OPENSHIFT_SDN: &str = "OpenShiftSDN";
pub(crate) const NETWORK_TYPE_KURYR: &str = "Kuryr";
pub(crate) const PLUGINS_USING_HOST_PREFIX: &[&str] = &[NETWORK_TYPE_OVN_KUBERNETES];

pub(crate) const PREFIX_LIST_SEPARATOR: &str = r"[\s,]+";
