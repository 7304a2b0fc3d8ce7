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

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::Resource;
use log::warn;

use crate::errors::Result;
use crate::interval::{Classify, ErrorClass, IntervalCalculator, IntervalConfig, Outcome, Requeue};

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::After(d) => Action::requeue(d),
            Requeue::Never => Action::await_change(),
        }
    }
}

impl Classify for kube::Error {
    fn class(&self) -> ErrorClass {
        match self {
            kube::Error::Api(resp) => match resp.code {
                404 => ErrorClass::Ignorable,
                400 | 401 | 403 | 422 => ErrorClass::Fatal,
                _ => ErrorClass::Retryable,
            },
            _ => ErrorClass::Retryable,
        }
    }
}

/// Per-object requeue decisions for a kube-runtime controller.
///
/// Pass an `Arc<RequeuePolicy<K>>` as the controller context (or keep one
/// inside it) and call [`RequeuePolicy::on_success`] at the end of
/// `reconcile`; [`error_policy`] handles the failure side.
pub struct RequeuePolicy<K: Resource<DynamicType = ()>> {
    calculator: Arc<IntervalCalculator<ObjectRef<K>>>,
}

impl<K: Resource<DynamicType = ()>> Clone for RequeuePolicy<K> {
    fn clone(&self) -> Self {
        Self {
            calculator: self.calculator.clone(),
        }
    }
}

impl<K: Resource<DynamicType = ()>> RequeuePolicy<K> {
    pub fn new(config: IntervalConfig) -> Result<Self> {
        Ok(Self {
            calculator: Arc::new(IntervalCalculator::new(config)?),
        })
    }

    pub fn on_success(&self, obj: &K) -> Action {
        self.calculator
            .next::<kube::Error>(&ObjectRef::from_obj(obj), Outcome::Success)
            .into()
    }

    pub fn on_error<E: Classify>(&self, obj: &K, err: &E) -> Action {
        self.calculator
            .next(&ObjectRef::from_obj(obj), Outcome::Failed(err))
            .into()
    }

    pub fn failures(&self, obj: &K) -> u32 {
        self.calculator.failures(&ObjectRef::from_obj(obj))
    }

    /// Drops the failure counter for `obj`, e.g. once it has been deleted
    /// or its finalizer has run.
    pub fn forget(&self, obj: &K) {
        self.calculator.forget(&ObjectRef::from_obj(obj));
    }

    pub fn calculator(&self) -> &IntervalCalculator<ObjectRef<K>> {
        &self.calculator
    }
}

/// `error_policy` for `Controller::run` when the context is the policy.
pub fn error_policy<K, E>(obj: Arc<K>, err: &E, policy: Arc<RequeuePolicy<K>>) -> Action
where
    K: Resource<DynamicType = ()>,
    E: Classify + std::fmt::Display,
{
    warn!("reconcile failed: {}", err);
    policy.on_error(obj.as_ref(), err)
}
