// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Closed catalog of attestation findings.
//!
//! Every finding a check can raise is a variant of [`Issue`]. The wire
//! encoding is a flat JSON object carrying the stable `id`, the affected
//! `aspect`, the `incident` severity flag and a variant-specific `args`
//! object. Ids are stable identifiers and never change once released.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

pub const ASPECT_FIRMWARE: &str = "firmware";
pub const ASPECT_CONFIGURATION: &str = "configuration";
pub const ASPECT_BOOTLOADER: &str = "bootloader";
pub const ASPECT_OPERATING_SYSTEM: &str = "operating-system";
pub const ASPECT_ENDPOINT_PROTECTION: &str = "endpoint-protection";
pub const ASPECT_SUPPLY_CHAIN: &str = "supply-chain";

// Error codes used in the `error` argument of some issues.
pub const ERR_SAN_INVALID: &str = "san-invalid";
pub const ERR_SAN_MISMATCH: &str = "san-mismatch";
pub const ERR_NO_EKU: &str = "no-eku";
pub const ERR_INVALID_CERTIFICATE: &str = "invalid-certificate";
pub const ERR_FORMAT_INVALID: &str = "format-invalid";
pub const ERR_PCR_MISMATCH: &str = "pcr-mismatch";
pub const ERR_MISSING_TRUST_POINT: &str = "missing-trust-point";
pub const ERR_WRONG_FORMAT: &str = "wrong-format";
pub const ERR_WRONG_SIGNATURE: &str = "wrong-signature";
pub const ERR_WRONG_QUOTE: &str = "wrong-quote";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsmeComponentChange {
    pub after: String,
    pub before: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsmeDowngradeArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined: Option<CsmeComponentChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<CsmeComponentChange>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsmeNoUpdateComponent {
    pub after: String,
    pub before: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CsmeNoUpdateArgs {
    pub components: Vec<CsmeNoUpdateComponent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EsetExcludedSetArgs {
    pub files: Vec<String>,
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileChange {
    pub after: String,
    pub before: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EsetManipulatedArgs {
    pub components: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EsetNotStartedComponent {
    pub path: String,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EsetNotStartedArgs {
    pub components: Vec<EsetNotStartedComponent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirmwareUpdateEntry {
    pub current: String,
    pub name: String,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirmwareUpdateArgs {
    pub updates: Vec<FirmwareUpdateEntry>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GrubConfig {
    pub command_line: Vec<String>,
    pub initrd: String,
    pub initrd_path: String,
    pub kernel: String,
    pub kernel_path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GrubBootChangedArgs {
    pub after: GrubConfig,
    pub before: GrubConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImaBootAggregateArgs {
    pub computed: String,
    pub logged: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImaInvalidLogPcr {
    pub computed: String,
    pub number: String,
    pub quoted: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImaInvalidLogArgs {
    pub pcr: Vec<ImaInvalidLogPcr>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImaRuntimeMeasurementsArgs {
    pub files: Vec<FileChange>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TpmEndorsementCertUnverifiedArgs {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ek_issuer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ek_vendor: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ek_version: String,
    pub error: String,
    pub vendor: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TpmInvalidEventlogPcr {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub computed: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub quoted: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TpmInvalidEventlogArgs {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pcr: Vec<TpmInvalidEventlogPcr>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiBootAppSetApp {
    pub after: String,
    pub before: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiBootAppSetArgs {
    pub apps: Vec<UefiBootAppSetApp>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiBootFailureArgs {
    pub pcr0: String,
    pub pcr1: String,
    pub pcr2: String,
    pub pcr3: String,
    pub pcr4: String,
    pub pcr5: String,
    pub pcr6: String,
    pub pcr7: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiBootOrderVariable {
    pub after: String,
    pub before: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiBootOrderArgs {
    pub variables: Vec<UefiBootOrderVariable>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiGptPartition {
    pub end: String,
    pub guid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub start: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiGptChangedArgs {
    pub after: String,
    pub before: String,
    pub guid: String,
    pub partitions: Vec<UefiGptPartition>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiIbbNoUpdateArgs {
    pub after: String,
    pub before: String,
    pub release_date: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiNoExitBootSrvArgs {
    pub entered: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DbxFingerprintsArgs {
    pub fprs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiOptionRomSetDevice {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    pub after: String,
    pub before: String,
    pub name: String,
    pub vendor: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiOptionRomSetArgs {
    pub devices: Vec<UefiOptionRomSetDevice>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecureBootCertificate {
    pub fpr: String,
    pub issuer: String,
    pub not_after: String,
    pub not_before: String,
    pub subject: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiSecureBootKeysArgs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kek: Vec<SecureBootCertificate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pk: Option<SecureBootCertificate>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UefiSecureBootVariablesArgs {
    pub audit_mode: String,
    pub deployed_mode: String,
    pub secure_boot: String,
    pub setup_mode: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowsBootConfigArgs {
    pub boot_debugging: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub code_integrity_disabled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dep_disabled: bool,
    pub kernel_debugging: bool,
    pub test_signing: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowsBootCounterReplayArgs {
    pub latest: String,
    pub received: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowsBootLogQuotesArgs {
    pub error: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub log: i64,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Every finding the rule engine can produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "id")]
pub enum Issue {
    #[serde(rename = "csme/downgrade")]
    CsmeDowngrade { args: CsmeDowngradeArgs },
    #[serde(rename = "csme/no-update")]
    CsmeNoUpdate { args: CsmeNoUpdateArgs },
    #[serde(rename = "eset/disabled")]
    EsetDisabled,
    #[serde(rename = "eset/excluded-set")]
    EsetExcludedSet { args: EsetExcludedSetArgs },
    #[serde(rename = "eset/manipulated")]
    EsetManipulated { args: EsetManipulatedArgs },
    #[serde(rename = "eset/not-started")]
    EsetNotStarted { args: EsetNotStartedArgs },
    #[serde(rename = "fw/update")]
    FirmwareUpdate { args: FirmwareUpdateArgs },
    #[serde(rename = "grub/boot-changed")]
    GrubBootChanged { args: GrubBootChangedArgs },
    #[serde(rename = "ima/boot-aggregate")]
    ImaBootAggregate { args: ImaBootAggregateArgs },
    #[serde(rename = "ima/invalid-log")]
    ImaInvalidLog { args: ImaInvalidLogArgs },
    #[serde(rename = "ima/runtime-measurements")]
    ImaRuntimeMeasurements { args: ImaRuntimeMeasurementsArgs },
    #[serde(rename = "policy/endpoint-protection")]
    PolicyEndpointProtection,
    #[serde(rename = "policy/intel-tsc")]
    PolicyIntelTsc,
    #[serde(rename = "tpm/dummy")]
    TpmDummy,
    #[serde(rename = "tpm/endorsement-cert-unverified")]
    TpmEndorsementCertUnverified {
        args: TpmEndorsementCertUnverifiedArgs,
    },
    #[serde(rename = "tpm/invalid-eventlog")]
    TpmInvalidEventlog { args: TpmInvalidEventlogArgs },
    #[serde(rename = "tpm/no-eventlog")]
    TpmNoEventlog,
    #[serde(rename = "uefi/boot-app-set")]
    UefiBootAppSet { args: UefiBootAppSetArgs },
    #[serde(rename = "uefi/boot-failure")]
    UefiBootFailure { args: UefiBootFailureArgs },
    #[serde(rename = "uefi/boot-order")]
    UefiBootOrder { args: UefiBootOrderArgs },
    #[serde(rename = "uefi/gpt-changed")]
    UefiGptChanged { args: UefiGptChangedArgs },
    #[serde(rename = "uefi/ibb-no-update")]
    UefiIbbNoUpdate { args: UefiIbbNoUpdateArgs },
    #[serde(rename = "uefi/no-exit-boot-srv")]
    UefiNoExitBootSrv { args: UefiNoExitBootSrvArgs },
    #[serde(rename = "uefi/official-dbx")]
    UefiOfficialDbx { args: DbxFingerprintsArgs },
    #[serde(rename = "uefi/option-rom-set")]
    UefiOptionRomSet { args: UefiOptionRomSetArgs },
    #[serde(rename = "uefi/secure-boot-dbx")]
    UefiSecureBootDbx { args: DbxFingerprintsArgs },
    #[serde(rename = "uefi/secure-boot-keys")]
    UefiSecureBootKeys { args: UefiSecureBootKeysArgs },
    #[serde(rename = "uefi/secure-boot-variables")]
    UefiSecureBootVariables { args: UefiSecureBootVariablesArgs },
    #[serde(rename = "windows/boot-config")]
    WindowsBootConfig { args: WindowsBootConfigArgs },
    #[serde(rename = "windows/boot-counter-replay")]
    WindowsBootCounterReplay { args: WindowsBootCounterReplayArgs },
    #[serde(rename = "windows/boot-log")]
    WindowsBootLogQuotes { args: WindowsBootLogQuotesArgs },
}

impl Issue {
    /// Stable identifier of the finding.
    pub fn id(&self) -> &'static str {
        match self {
            Issue::CsmeDowngrade { .. } => "csme/downgrade",
            Issue::CsmeNoUpdate { .. } => "csme/no-update",
            Issue::EsetDisabled => "eset/disabled",
            Issue::EsetExcludedSet { .. } => "eset/excluded-set",
            Issue::EsetManipulated { .. } => "eset/manipulated",
            Issue::EsetNotStarted { .. } => "eset/not-started",
            Issue::FirmwareUpdate { .. } => "fw/update",
            Issue::GrubBootChanged { .. } => "grub/boot-changed",
            Issue::ImaBootAggregate { .. } => "ima/boot-aggregate",
            Issue::ImaInvalidLog { .. } => "ima/invalid-log",
            Issue::ImaRuntimeMeasurements { .. } => "ima/runtime-measurements",
            Issue::PolicyEndpointProtection => "policy/endpoint-protection",
            Issue::PolicyIntelTsc => "policy/intel-tsc",
            Issue::TpmDummy => "tpm/dummy",
            Issue::TpmEndorsementCertUnverified { .. } => "tpm/endorsement-cert-unverified",
            Issue::TpmInvalidEventlog { .. } => "tpm/invalid-eventlog",
            Issue::TpmNoEventlog => "tpm/no-eventlog",
            Issue::UefiBootAppSet { .. } => "uefi/boot-app-set",
            Issue::UefiBootFailure { .. } => "uefi/boot-failure",
            Issue::UefiBootOrder { .. } => "uefi/boot-order",
            Issue::UefiGptChanged { .. } => "uefi/gpt-changed",
            Issue::UefiIbbNoUpdate { .. } => "uefi/ibb-no-update",
            Issue::UefiNoExitBootSrv { .. } => "uefi/no-exit-boot-srv",
            Issue::UefiOfficialDbx { .. } => "uefi/official-dbx",
            Issue::UefiOptionRomSet { .. } => "uefi/option-rom-set",
            Issue::UefiSecureBootDbx { .. } => "uefi/secure-boot-dbx",
            Issue::UefiSecureBootKeys { .. } => "uefi/secure-boot-keys",
            Issue::UefiSecureBootVariables { .. } => "uefi/secure-boot-variables",
            Issue::WindowsBootConfig { .. } => "windows/boot-config",
            Issue::WindowsBootCounterReplay { .. } => "windows/boot-counter-replay",
            Issue::WindowsBootLogQuotes { .. } => "windows/boot-log",
        }
    }

    /// Platform aspect the finding concerns.
    pub fn aspect(&self) -> &'static str {
        match self {
            Issue::CsmeDowngrade { .. }
            | Issue::CsmeNoUpdate { .. }
            | Issue::FirmwareUpdate { .. }
            | Issue::TpmInvalidEventlog { .. }
            | Issue::TpmNoEventlog
            | Issue::UefiBootFailure { .. }
            | Issue::UefiIbbNoUpdate { .. }
            | Issue::UefiNoExitBootSrv { .. }
            | Issue::UefiOptionRomSet { .. }
            | Issue::UefiSecureBootKeys { .. } => ASPECT_FIRMWARE,
            Issue::UefiBootOrder { .. }
            | Issue::UefiOfficialDbx { .. }
            | Issue::UefiSecureBootDbx { .. }
            | Issue::UefiSecureBootVariables { .. } => ASPECT_CONFIGURATION,
            Issue::GrubBootChanged { .. }
            | Issue::UefiBootAppSet { .. }
            | Issue::UefiGptChanged { .. } => ASPECT_BOOTLOADER,
            Issue::WindowsBootConfig { .. }
            | Issue::WindowsBootCounterReplay { .. }
            | Issue::WindowsBootLogQuotes { .. } => ASPECT_OPERATING_SYSTEM,
            Issue::EsetDisabled
            | Issue::EsetExcludedSet { .. }
            | Issue::EsetManipulated { .. }
            | Issue::EsetNotStarted { .. }
            | Issue::ImaBootAggregate { .. }
            | Issue::ImaInvalidLog { .. }
            | Issue::ImaRuntimeMeasurements { .. }
            | Issue::PolicyEndpointProtection => ASPECT_ENDPOINT_PROTECTION,
            Issue::PolicyIntelTsc | Issue::TpmDummy | Issue::TpmEndorsementCertUnverified { .. } => {
                ASPECT_SUPPLY_CHAIN
            }
        }
    }

    /// True when the finding means the device deviates from its trusted
    /// state, as opposed to an advisory.
    pub fn incident(&self) -> bool {
        !matches!(
            self,
            Issue::FirmwareUpdate { .. }
                | Issue::UefiNoExitBootSrv { .. }
                | Issue::UefiOfficialDbx { .. }
                | Issue::WindowsBootConfig { .. }
        )
    }
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        fn wire<S: Serializer, A: Serialize>(
            serializer: S,
            issue: &Issue,
            args: Option<&A>,
        ) -> Result<S::Ok, S::Error> {
            let mut s = serializer.serialize_struct("Issue", if args.is_some() { 4 } else { 3 })?;
            s.serialize_field("aspect", issue.aspect())?;
            s.serialize_field("id", issue.id())?;
            s.serialize_field("incident", &issue.incident())?;
            if let Some(args) = args {
                s.serialize_field("args", args)?;
            }
            s.end()
        }
        match self {
            Issue::CsmeDowngrade { args } => wire(serializer, self, Some(args)),
            Issue::CsmeNoUpdate { args } => wire(serializer, self, Some(args)),
            Issue::EsetDisabled => wire::<S, ()>(serializer, self, None),
            Issue::EsetExcludedSet { args } => wire(serializer, self, Some(args)),
            Issue::EsetManipulated { args } => wire(serializer, self, Some(args)),
            Issue::EsetNotStarted { args } => wire(serializer, self, Some(args)),
            Issue::FirmwareUpdate { args } => wire(serializer, self, Some(args)),
            Issue::GrubBootChanged { args } => wire(serializer, self, Some(args)),
            Issue::ImaBootAggregate { args } => wire(serializer, self, Some(args)),
            Issue::ImaInvalidLog { args } => wire(serializer, self, Some(args)),
            Issue::ImaRuntimeMeasurements { args } => wire(serializer, self, Some(args)),
            Issue::PolicyEndpointProtection => wire::<S, ()>(serializer, self, None),
            Issue::PolicyIntelTsc => wire::<S, ()>(serializer, self, None),
            Issue::TpmDummy => wire::<S, ()>(serializer, self, None),
            Issue::TpmEndorsementCertUnverified { args } => wire(serializer, self, Some(args)),
            Issue::TpmInvalidEventlog { args } => wire(serializer, self, Some(args)),
            Issue::TpmNoEventlog => wire::<S, ()>(serializer, self, None),
            Issue::UefiBootAppSet { args } => wire(serializer, self, Some(args)),
            Issue::UefiBootFailure { args } => wire(serializer, self, Some(args)),
            Issue::UefiBootOrder { args } => wire(serializer, self, Some(args)),
            Issue::UefiGptChanged { args } => wire(serializer, self, Some(args)),
            Issue::UefiIbbNoUpdate { args } => wire(serializer, self, Some(args)),
            Issue::UefiNoExitBootSrv { args } => wire(serializer, self, Some(args)),
            Issue::UefiOfficialDbx { args } => wire(serializer, self, Some(args)),
            Issue::UefiOptionRomSet { args } => wire(serializer, self, Some(args)),
            Issue::UefiSecureBootDbx { args } => wire(serializer, self, Some(args)),
            Issue::UefiSecureBootKeys { args } => wire(serializer, self, Some(args)),
            Issue::UefiSecureBootVariables { args } => wire(serializer, self, Some(args)),
            Issue::WindowsBootConfig { args } => wire(serializer, self, Some(args)),
            Issue::WindowsBootCounterReplay { args } => wire(serializer, self, Some(args)),
            Issue::WindowsBootLogQuotes { args } => wire(serializer, self, Some(args)),
        }
    }
}

/// Wire container for a set of findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issues {
    #[serde(rename = "type")]
    pub typ: String,
    pub issues: Vec<Issue>,
}

impl Issues {
    pub fn new(issues: Vec<Issue>) -> Self {
        Issues {
            typ: "issues/v1".to_string(),
            issues,
        }
    }
}
