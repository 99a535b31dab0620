// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! The per-device baseline: the trusted boot state checks compare evidence
//! against. Baselines start empty and are filled trust-on-first-use by the
//! update pass; operator overrides replace individual values after an
//! incident has been reviewed.
//!
//! The JSON field names are a wire contract shared with stored documents
//! and must not change, including the misspelled `csem_fitc`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::digest::DigestSet;

pub const BASELINE_TYPE: &str = "baseline/3";

/// A binary blob stored base64-encoded, the document encoding for raw
/// measurement data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Buffer(pub Vec<u8>);

impl Serialize for Buffer {
    fn serialize<S: serde::Serializer>(
        &self,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        s.serialize_str(
            &base64::engine::general_purpose::STANDARD.encode(&self.0),
        )
    }
}

impl<'de> Deserialize<'de> for Buffer {
    fn deserialize<D: serde::Deserializer<'de>>(
        d: D,
    ) -> Result<Self, D::Error> {
        use base64::Engine;
        let text = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&text)
            .map(Buffer)
            .map_err(serde::de::Error::custom)
    }
}

/// A pinned boot application measurement. The certificate fingerprint, when
/// set, accepts re-signed binaries whose authority has not changed instead
/// of the exact image hash.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BootAppMeasurement {
    pub hash: DigestSet,
    #[serde(
        rename = "cert_fp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub pinned_certificate_fingerprint: Option<[u8; 32]>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Values {
    #[serde(rename = "type")]
    pub typ: String,

    // CSME runtime measurements
    pub csme_component_hash: HashMap<u8, Buffer>,
    pub csme_component_version: HashMap<u8, Vec<u32>>,
    pub csme_version: Vec<u32>,
    #[serde(rename = "csem_fitc")]
    pub csme_fitc: Vec<u32>,
    pub csme_recovery: Vec<u32>,

    // CSME SVN rollback
    pub csme_component_svn: HashMap<u8, u32>,
    pub csme_component_arb: HashMap<u8, u32>,
    pub csme_component_vcn: HashMap<u8, u32>,

    // Boot Guard
    pub bootguard_ibb: DigestSet,
    pub bios_version: String,
    pub bios_release_date: String,

    pub allow_vulnerable_csme: bool,

    // embedded firmware volumes, keyed by hex flash base address
    #[serde(rename = "option_roms")]
    pub embedded_firmware: HashMap<String, DigestSet>,

    pub boot_variables: HashMap<String, DigestSet>,

    pub boot_applications: HashMap<String, BootAppMeasurement>,

    /// Sorted.
    pub revoked_key_whitelist: Vec<String>,

    pub setup_variable: DigestSet,

    pub gpt: DigestSet,

    // UEFI Secure Boot
    pub pk: DigestSet,
    pub kek: DigestSet,
    pub dbx: HashMap<String, bool>,
    pub secureboot_enabled: bool,

    // GRUB
    pub linux_path: String,
    pub linux_digest: DigestSet,
    pub linux_command_line: Vec<String>,
    pub initrd_path: String,
    pub initrd_digest: DigestSet,

    // shim
    pub moklist: DigestSet,
    pub moklistx: DigestSet,

    // TPM
    pub endorsement_certificate: Option<Buffer>,

    // contextless overrides
    pub allow_no_eventlog: bool,
    pub allow_invalid_eventlog: bool,
    pub allow_invalid_ima_log: bool,
    #[serde(rename = "allow_exit_boot_services")]
    pub allow_missing_exit_boot_services: bool,
    /// Sorted.
    pub allow_boot_failure: Vec<u32>,
    pub allow_missing_lvfs: bool,
    #[serde(rename = "allow_tsc_pcr_mismatch")]
    pub allow_tsc_platform_regs_mismatch: bool,
    #[serde(rename = "allow_tsc_ek_mismatch")]
    pub allow_tsc_endorsement_key_mismatch: bool,
    #[serde(rename = "allow_ek_cert_unverified")]
    pub allow_ek_certificate_unverified: bool,
    pub allow_unsecure_windows_boot: bool,
    pub allow_outdated_firmware: bool,

    pub allow_dummy_tpm: bool,

    pub allow_binarly_vulnerability_ids: Vec<String>,

    // IMA
    pub boot_aggregate: DigestSet,
    pub file_measurements: HashMap<String, DigestSet>,

    // ESET endpoint protection
    #[serde(rename = "AllowDisabledESET")]
    pub allow_disabled_eset: bool,
    /// Sorted.
    #[serde(rename = "ESETExcludedFiles")]
    pub eset_excluded_files: Vec<String>,
    /// Sorted.
    #[serde(rename = "ESETExcludedProcesses")]
    pub eset_excluded_processes: Vec<String>,
    #[serde(rename = "ESETFiles")]
    pub eset_files: HashMap<String, DigestSet>,
    #[serde(rename = "ESETKernelModule")]
    pub eset_kernel_module: DigestSet,

    // Windows boot counter, hex string to survive u64 JSON round trips
    pub boot_count: String,
}

impl Values {
    pub fn new() -> Values {
        Values {
            typ: BASELINE_TYPE.to_string(),
            ..Values::default()
        }
    }
}
