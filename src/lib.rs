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

//! Network planning and reconcile pacing helpers for cluster installers and
//! controllers: CIDR arithmetic, prefix aggregation, VPC subnet layout,
//! networking validation and a per-object requeue backoff calculator.

pub mod cidr;
pub mod classify;
pub mod constants;
pub mod errors;
pub mod interval;
pub mod iputil;
pub mod requeue;
pub mod subnets;
pub mod validation;

pub use cidr::Cidr;
pub use errors::{Error, Result};
pub use interval::{Classify, ErrorClass, IntervalCalculator, IntervalConfig, Outcome, Requeue};
