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

use std::collections::HashSet;

use thiserror::Error;

use crate::interval::{Classify, ErrorClass};

/// Lookup table from provider error codes to an [`ErrorClass`]. Codes are
/// compared case-insensitively.
#[derive(Clone, Debug)]
pub struct CodeTable {
    retryable: HashSet<String>,
    fatal: HashSet<String>,
    ignorable: HashSet<String>,
    default: ErrorClass,
}

impl CodeTable {
    pub fn new(default: ErrorClass) -> Self {
        Self {
            retryable: HashSet::new(),
            fatal: HashSet::new(),
            ignorable: HashSet::new(),
            default,
        }
    }

    /// EC2 and IAM codes seen while provisioning and tearing down VPCs.
    pub fn aws() -> Self {
        Self::new(ErrorClass::Retryable)
            .with(
                ErrorClass::Retryable,
                &[
                    "InvalidSubnet",
                    "InvalidElasticIpID.NotFound",
                    "InvalidIPAddress.InUse",
                    "Throttling",
                    "RequestLimitExceeded",
                ],
            )
            .with(
                ErrorClass::Fatal,
                &[
                    "AuthFailure",
                    "UnauthorizedOperation",
                    "InvalidParameterValue",
                    "OptInRequired",
                ],
            )
            .with(
                ErrorClass::Ignorable,
                &[
                    "InvalidVpcID.NotFound",
                    "InvalidNatGatewayID.NotFound",
                    "InvalidRouteTableId.NotFound",
                    "NoSuchEntity",
                ],
            )
    }

    /// Adds `codes` under `class`, moving them out of any other class.
    pub fn with(mut self, class: ErrorClass, codes: &[&str]) -> Self {
        for code in codes {
            let code = code.to_ascii_lowercase();
            self.retryable.remove(&code);
            self.fatal.remove(&code);
            self.ignorable.remove(&code);
            match class {
                ErrorClass::Retryable => self.retryable.insert(code),
                ErrorClass::Fatal => self.fatal.insert(code),
                ErrorClass::Ignorable => self.ignorable.insert(code),
            };
        }
        self
    }

    pub fn classify(&self, code: &str) -> ErrorClass {
        let code = code.to_ascii_lowercase();
        if self.fatal.contains(&code) {
            ErrorClass::Fatal
        } else if self.ignorable.contains(&code) {
            ErrorClass::Ignorable
        } else if self.retryable.contains(&code) {
            ErrorClass::Retryable
        } else {
            self.default
        }
    }

    pub fn error(&self, code: &str, message: impl Into<String>) -> CodedError {
        CodedError {
            code: code.to_string(),
            message: message.into(),
            class: self.classify(code),
        }
    }
}

/// A provider error carrying its code and the class the table gave it.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CodedError {
    pub code: String,
    pub message: String,
    class: ErrorClass,
}

impl Classify for CodedError {
    fn class(&self) -> ErrorClass {
        self.class
    }
}

#[cfg(test)]
mod tests {
    use super::CodeTable;
    use crate::interval::{Classify, ErrorClass};

    #[test]
    pub fn test_aws_table_classifies_known_codes() {
        let table = CodeTable::aws();
        assert_eq!(table.classify("InvalidSubnet"), ErrorClass::Retryable);
        assert_eq!(table.classify("AuthFailure"), ErrorClass::Fatal);
        assert_eq!(table.classify("InvalidVpcID.NotFound"), ErrorClass::Ignorable);
        assert_eq!(table.classify("NoSuchEntity"), ErrorClass::Ignorable);
    }

    #[test]
    pub fn test_codes_match_case_insensitively() {
        let table = CodeTable::aws();
        assert_eq!(table.classify("invalidsubnet"), ErrorClass::Retryable);
        assert_eq!(table.classify("AUTHFAILURE"), ErrorClass::Fatal);
    }

    #[test]
    pub fn test_unknown_codes_use_the_default() {
        assert_eq!(CodeTable::aws().classify("SomethingNew"), ErrorClass::Retryable);
        let strict = CodeTable::new(ErrorClass::Fatal);
        assert_eq!(strict.classify("SomethingNew"), ErrorClass::Fatal);
    }

    #[test]
    pub fn test_with_moves_codes_between_classes() {
        let table = CodeTable::aws().with(ErrorClass::Fatal, &["throttling"]);
        assert_eq!(table.classify("Throttling"), ErrorClass::Fatal);
    }

    #[test]
    pub fn test_coded_error_carries_its_class() {
        let err = CodeTable::aws().error("InvalidRouteTableId.NotFound", "route table rtb-123 not found");
        assert_eq!(err.class(), ErrorClass::Ignorable);
        assert_eq!(
            err.to_string(),
            "InvalidRouteTableId.NotFound: route table rtb-123 not found"
        );
    }
}
