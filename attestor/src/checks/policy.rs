// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Policy checks: capabilities a device policy requires must actually
//! show up in the evidence. These checks never touch the baseline.

use super::{has_endpoint_protection, has_supply_chain, Check};
use crate::issues::Issue;
use crate::policy::Trinary;
use crate::reference::Reference;
use crate::subject::Subject;

pub struct PolicyEndpointProtection;

impl Check for PolicyEndpointProtection {
    fn name(&self) -> &'static str {
        "Endpoint protection policy"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.policy.endpoint_protection == Trinary::True
            && !has_endpoint_protection(subj)
        {
            return Some(Issue::PolicyEndpointProtection);
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        _overrides: &[String],
        _subj: &mut Subject,
    ) {
    }
}

pub struct PolicyIntelTsc;

impl Check for PolicyIntelTsc {
    fn name(&self) -> &'static str {
        "Intel TSC policy"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.policy.intel_tsc == Trinary::True
            && !has_supply_chain(subj)
        {
            return Some(Issue::PolicyIntelTsc);
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        _overrides: &[String],
        _subj: &mut Subject,
    ) {
    }
}
