// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Operator policy: which protections a device is required to have, as
//! opposed to the baseline which records what it has. Policy values are
//! tri-state so fleets can mix devices with and without a capability.

use serde::{Deserialize, Serialize};

pub const POLICY_TYPE: &str = "policy/1";

/// A required/forbidden/optional switch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum Trinary {
    #[serde(rename = "on")]
    True,
    #[serde(rename = "off")]
    False,
    #[default]
    #[serde(rename = "if-present")]
    IfPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectedFile {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Values {
    #[serde(rename = "type")]
    pub typ: String,
    pub endpoint_protection: Trinary,
    pub intel_tsc: Trinary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub protected_files: Vec<ProtectedFile>,
}

impl Values {
    pub fn new() -> Values {
        Values {
            typ: POLICY_TYPE.to_string(),
            ..Values::default()
        }
    }
}
