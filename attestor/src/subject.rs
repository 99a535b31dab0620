// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Evidence values and the Subject a verification run operates on.
//!
//! A [`Subject`] bundles one device's policy, baseline and freshly received
//! evidence into the shape the checks consume: decoded event logs, the
//! Windows boot configuration, the IMA runtime log and the boot facts
//! accumulated from the typed events. Assembly is lenient where the original
//! data may legitimately be broken (an unparsable event log is skipped, not
//! fatal) and strict where breakage means manipulation (an event payload
//! that contradicts its own digest aborts with an error).

use std::collections::HashMap;

use log::{info, warn};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::{self, Buffer};
use crate::boot::{Boot, BootError};
use crate::eventlog::ima::{parse_ima, ImaError, ImaEvent};
use crate::eventlog::typed::parse_events;
use crate::eventlog::windows::{parse_win_events, WinEvents};
use crate::eventlog::{EventLog, HashAlg};
use crate::policy;

pub const VALUES_TYPE: &str = "values/3";

#[derive(Error, Debug)]
pub enum SubjectError {
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error("IMA log: {0}")]
    ImaLog(#[from] ImaError),
    #[error("decompress evidence: {0}")]
    Decompress(#[from] std::io::Error),
}

/// A byte blob that may arrive inline or as a reference into the blob store,
/// keyed by its SHA-256 digest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashBlob {
    pub data: Buffer,
    pub sha256: Buffer,
    pub error: String,
}

/// A byte blob paired with the collector-side error, if any. Data with a
/// non-empty error never enters verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBuffer {
    pub data: Buffer,
    pub error: String,
}

/// ESET endpoint-protection state read from the module's sysfs interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EsetConfig {
    pub enabled: ErrorBuffer,
    pub excluded_files: ErrorBuffer,
    pub excluded_processes: ErrorBuffer,
}

/// One device as reported by fwupd.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FwupdTopologyEntry {
    #[serde(rename = "DeviceId")]
    pub device_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "VersionFormat")]
    pub version_format: u32,
}

/// One available release for a fwupd device, sorted newest first by the
/// collector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FwupdReleaseEntry {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "TrustFlags")]
    pub trust_flags: u64,
}

/// fwupd topology and pending releases, keyed by device id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Devices {
    pub topology: Vec<FwupdTopologyEntry>,
    pub releases: HashMap<String, Vec<FwupdReleaseEntry>>,
}

/// Platform identity strings decoded from the firmware tables on the
/// collector side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformInfo {
    pub vendor: String,
    pub version: String,
    pub release_date: String,
}

/// The evidence document a device submits for verification.
///
/// PCR banks are keyed by the decimal TPM algorithm id ("4" for SHA-1, "11"
/// for SHA-256), each bank mapping decimal PCR index to the hex quoted
/// value. Firmware-interface readings that need vendor decoders (SMBIOS,
/// CPUID, the ME version protocol) arrive pre-decoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Values {
    #[serde(rename = "type")]
    pub typ: String,

    pub pcr: HashMap<String, HashMap<String, String>>,
    pub event_logs: Vec<HashBlob>,
    pub ima_log: Option<ErrorBuffer>,

    // windows only: PCP key name -> DER SubjectPublicKeyInfo
    #[serde(rename = "PCPQuoteKeys")]
    pub pcp_quote_keys: HashMap<String, Buffer>,

    pub eset: Option<EsetConfig>,
    pub devices: Option<Devices>,

    // path -> SHA-256 digest into the blob store
    pub antimalware_processes: HashMap<String, Buffer>,
    pub early_launch_drivers: HashMap<String, Buffer>,

    // boot application path -> DER Authenticode signer certificate the
    // collector verified the image against
    pub boot_app_signers: HashMap<String, Buffer>,

    // ME runtime versions, empty when the interface did not answer
    pub csme_version: Vec<u32>,
    pub csme_recovery: Vec<u32>,
    pub csme_fitc: Vec<u32>,

    pub platform: Option<PlatformInfo>,
    // TPM manufacturer in TCG "id:<hex>" notation
    pub tpm_vendor: String,
    pub cpu_vendor: String,
    pub amd64: Option<bool>,
}

impl Values {
    pub fn new() -> Values {
        Values {
            typ: VALUES_TYPE.to_owned(),
            ..Default::default()
        }
    }

    /// Active, recovery and flash-image-tool versions reported by the ME
    /// runtime, or `None` when the device has none or it did not answer.
    pub fn csme_versions(&self) -> Option<(&[u32], &[u32], &[u32])> {
        if self.csme_version.is_empty() {
            return None;
        }
        Some((
            &self.csme_version,
            &self.csme_recovery,
            &self.csme_fitc,
        ))
    }

    pub fn platform_version(&self) -> Option<(&str, &str)> {
        self.platform
            .as_ref()
            .map(|p| (p.version.as_str(), p.release_date.as_str()))
    }

    pub fn platform_vendor(&self) -> Option<&str> {
        self.platform.as_ref().map(|p| p.vendor.as_str())
    }
}

/// Supply-chain attestation material passed alongside the evidence. Opaque
/// here; its presence is what the policy checks care about.
#[derive(Debug, Clone, Default)]
pub struct SupplyChainEvidence {
    pub data: Vec<u8>,
    pub certificates: Vec<Vec<u8>>,
}

/// Optional inputs for [`Subject::new`].
#[derive(Debug, Clone, Default)]
pub struct SubjectOptions {
    /// Blob store contents keyed by hex SHA-256 digest. Resolves evidence
    /// fields that were shipped out of line.
    pub blobs: HashMap<String, Vec<u8>>,
    pub supply_chain: Option<SupplyChainEvidence>,
}

/// A fwupd device joined with its pending releases.
#[derive(Debug, Clone, Default)]
pub struct FwupdDevice {
    pub name: String,
    pub version: String,
    pub version_format: u32,
    pub releases: Vec<FwupdReleaseEntry>,
}

/// Everything the check engine operates on for a single attestation.
#[derive(Debug)]
pub struct Subject {
    pub policy: policy::Values,
    pub baseline: baseline::Values,
    pub baseline_modified: bool,

    pub values: Values,
    /// Index into `event_logs` of the log covering the cold boot.
    pub boot_event_log_idx: usize,
    /// Index into `event_logs` of the most recent log.
    pub current_event_log_idx: usize,
    pub event_logs: Vec<EventLog>,
    pub ima_log: Vec<ImaEvent>,
    pub windows_logs: Vec<WinEvents>,
    pub anti_malware_processes: HashMap<String, Vec<u8>>,
    pub early_launch_drivers: HashMap<String, Vec<u8>>,
    pub boot_app_signers: HashMap<String, Vec<u8>>,
    pub boot: Boot,
    pub fwupd_devices: HashMap<String, FwupdDevice>,
    pub supply_chain: Option<SupplyChainEvidence>,
}

/// Decodes all event log blobs and folds the cold boot log into the boot
/// facts. Unparsable logs are skipped; a payload that fails its own digest
/// check aborts because it points to manipulation rather than breakage.
fn parse_event_logs(
    blobs: &[HashBlob],
    boot: &mut Boot,
) -> Result<(Vec<EventLog>, Vec<WinEvents>, usize, usize), SubjectError> {
    let mut logs = Vec::new();
    let mut win_logs = Vec::new();
    let mut boot_idx = 0;
    let mut cur_idx = 0;

    for (i, blob) in blobs.iter().enumerate() {
        if blob.data.0.is_empty() {
            continue;
        }

        let log = match EventLog::parse(&blob.data.0) {
            Ok(log) => log,
            Err(err) => {
                info!(
                    "skipping unparsable event log {}/{}: {}",
                    i,
                    blobs.len(),
                    err
                );
                continue;
            }
        };

        let raw256 = log.events(HashAlg::Sha256);
        let raw1 = log.events(HashAlg::Sha1);
        let typed256 = parse_events(&raw256);
        let typed1 = parse_events(&raw1);

        // The Windows boot configuration lives in the SHA-256 bank on
        // current machines; fall back to SHA-1 for legacy logs.
        let winlog = match parse_win_events(&raw256) {
            Ok(w) => Some(w),
            Err(_) => parse_win_events(&raw1).ok(),
        };
        let cold_boot = winlog.as_ref().map(|w| w.cold_boot).unwrap_or(false);
        if let Some(w) = winlog {
            win_logs.push(w);
        }

        logs.push(log);

        // A single log is the cold boot log by definition; with multiple
        // logs the Windows resume counter tells the cold boot one apart.
        if logs.len() == 1 || cold_boot {
            for event in &typed256 {
                boot.consume(event)?;
            }
            for event in &typed1 {
                boot.consume(event)?;
            }
            boot_idx = logs.len() - 1;
        }
        cur_idx = logs.len() - 1;
    }

    Ok((logs, win_logs, boot_idx, cur_idx))
}

fn resolve_blobs(
    wanted: &HashMap<String, Buffer>,
    store: &HashMap<String, Vec<u8>>,
    what: &str,
) -> HashMap<String, Vec<u8>> {
    let mut out = HashMap::new();
    for (path, digest) in wanted {
        let key = hex::encode(&digest.0);
        match store.get(&key) {
            Some(data) => {
                out.insert(path.clone(), data.clone());
            }
            None => {
                warn!("{} blob missing: {} ({})", what, path, key);
            }
        }
    }
    out
}

fn join_fwupd_devices(
    devices: &Devices,
) -> HashMap<String, FwupdDevice> {
    let mut out = HashMap::new();
    for (device_id, releases) in &devices.releases {
        if releases.is_empty() {
            continue;
        }
        let entry = match devices
            .topology
            .iter()
            .find(|d| d.device_id == *device_id)
        {
            Some(e) => e,
            None => {
                warn!("release for non-existent device {}", device_id);
                continue;
            }
        };
        let dev =
            out.entry(device_id.clone()).or_insert_with(|| FwupdDevice {
                name: entry.name.clone(),
                version: entry.version.clone(),
                version_format: entry.version_format,
                releases: Vec::new(),
            });
        for release in releases {
            if !release.version.is_empty() {
                dev.releases.push(release.clone());
            }
        }
    }
    out
}

impl Subject {
    pub fn new(
        mut values: Values,
        baseline: baseline::Values,
        policy: policy::Values,
        opts: SubjectOptions,
    ) -> Result<Subject, SubjectError> {
        // resolve out-of-line event logs from the blob store
        for (i, blob) in values.event_logs.iter_mut().enumerate() {
            if !blob.data.0.is_empty() || blob.sha256.0.is_empty() {
                continue;
            }
            let key = hex::encode(&blob.sha256.0);
            match opts.blobs.get(&key) {
                Some(data) => blob.data = Buffer(data.clone()),
                None => warn!("event log blob {} missing: {}", i, key),
            }
        }

        let mut boot = Boot::new();
        let (event_logs, windows_logs, boot_event_log_idx, cur_idx) =
            parse_event_logs(&values.event_logs, &mut boot)?;

        // The runtime measurement log ships zstd-compressed. Verification
        // against the quote is a check's job; consumption here only gathers
        // file facts.
        let mut ima_log = Vec::new();
        if let Some(blob) = &values.ima_log {
            if !blob.data.0.is_empty() && blob.error.is_empty() {
                let raw = zstd::decode_all(blob.data.0.as_slice())?;
                ima_log = parse_ima(&raw)?;
                for event in &ima_log {
                    boot.consume_ima(event)?;
                }
            }
        }

        let anti_malware_processes = resolve_blobs(
            &values.antimalware_processes,
            &opts.blobs,
            "antimalware process",
        );
        let early_launch_drivers = resolve_blobs(
            &values.early_launch_drivers,
            &opts.blobs,
            "early launch driver",
        );
        let boot_app_signers = values
            .boot_app_signers
            .iter()
            .map(|(path, der)| (path.clone(), der.0.clone()))
            .collect();

        let fwupd_devices = values
            .devices
            .as_ref()
            .map(join_fwupd_devices)
            .unwrap_or_default();

        Ok(Subject {
            policy,
            baseline,
            baseline_modified: false,
            values,
            boot_event_log_idx,
            current_event_log_idx: cur_idx,
            event_logs,
            ima_log,
            windows_logs,
            anti_malware_processes,
            early_launch_drivers,
            boot_app_signers,
            boot,
            fwupd_devices,
            supply_chain: opts.supply_chain,
        })
    }
}
