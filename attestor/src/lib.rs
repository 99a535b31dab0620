// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Attestation backend core: parses and replays measured boot evidence
//! (TCG event logs, IMA runtime logs, Windows boot logs) and judges it
//! against a per-device baseline with a fixed set of checks.

pub mod baseline;
pub mod boot;
pub mod checks;
pub mod digest;
pub mod error;
pub mod eventlog;
pub mod issues;
pub mod policy;
pub mod reference;
pub mod subject;
