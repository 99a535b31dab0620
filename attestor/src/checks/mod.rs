// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! The rule engine: a closed set of checks run against a [`Subject`].
//!
//! Every check implements [`Check`]. `verify` inspects the subject against
//! the unmodified baseline and reports at most one [`Issue`]; it never
//! mutates. `update` absorbs drift into the baseline: with an empty
//! override list only benign drift (new algorithms for already-trusted
//! artifacts, monotonic upgrades, first-use population), with an override
//! list also the changes the listed issues complained about. Reference
//! data shared by all devices lives in [`Reference`] and is handed to
//! every check explicitly.

use log::{info, warn};

use crate::issues::Issue;
use crate::reference::Reference;
use crate::subject::Subject;

pub mod csme;
pub mod eset;
pub mod fwupd;
pub mod ima;
pub mod linux;
pub mod policy;
pub mod tpm;
pub mod uefi;
pub mod windows;

/// One rule of the engine.
pub trait Check {
    /// Human-readable name, for logs.
    fn name(&self) -> &'static str;

    /// Inspects the subject and reports a finding, or `None` when the
    /// check passes or does not apply. Must not mutate the subject.
    fn verify(&self, reference: &Reference, subj: &Subject)
        -> Option<Issue>;

    /// Folds evidence into the baseline. `overrides` carries issue ids
    /// whose mismatching baseline fields the operator allowed to be
    /// replaced; it is sorted.
    fn update(
        &self,
        reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    );
}

/// Every check the engine knows. The set is closed: checks are not
/// registered at runtime and run in this order.
static REGISTRY: &[&(dyn Check + Sync)] = &[
    &csme::CsmeDowngrade,
    &csme::CsmeNoUpdate,
    &uefi::IntelBootGuard,
    &eset::EsetModuleEnabled,
    &eset::EsetExcluded,
    &eset::EsetFilesManipulated,
    &ima::ImaLog,
    &ima::ImaBootAggregate,
    &ima::ImaFiles,
    &linux::Grub,
    &tpm::TpmEventLog,
    &tpm::DummyTpm,
    &tpm::TpmEndorsementCertificate,
    &uefi::UefiBootConfig,
    &uefi::UefiBootApp,
    &uefi::UefiPartitionTable,
    &uefi::UefiSecureBootDisabled,
    &uefi::UefiSecureBootKeys,
    &uefi::UefiDbx,
    &uefi::UefiExitBootServices,
    &uefi::UefiSeparators,
    &uefi::UefiOfficialDbx,
    &uefi::UefiEmbeddedFirmware,
    &windows::WindowsKernelConfig,
    &fwupd::FirmwareUpdateCheck,
    &windows::WindowsBootLogQuotes,
    &windows::WindowsBootCounter,
    &policy::PolicyEndpointProtection,
    &policy::PolicyIntelTsc,
];

/// Outcome of one evidence submission.
#[derive(Debug, Default)]
pub struct CheckResult {
    pub issues: Vec<Issue>,
    pub supply_chain: bool,
    pub endpoint_protection: bool,
}

/// Verifies every check against the unmodified baseline, then lets every
/// check absorb benign drift. Issues found in the first pass survive the
/// second: updates without overrides never repair a reported mismatch.
pub fn run(reference: &Reference, subj: &mut Subject) -> CheckResult {
    let mut issues = Vec::new();

    for check in REGISTRY {
        if let Some(iss) = check.verify(reference, subj) {
            info!("{}: {}", check.name(), iss.id());
            issues.push(iss);
        }
    }

    for check in REGISTRY {
        check.update(reference, &[], subj);
    }

    CheckResult {
        endpoint_protection: has_endpoint_protection(subj),
        supply_chain: has_supply_chain(subj),
        issues,
    }
}

/// Re-runs the update pass with an explicit list of previously reported
/// issue ids, authorizing the owning checks to replace the mismatching
/// baseline fields.
pub fn override_issues(
    reference: &Reference,
    overrides: &[String],
    subj: &mut Subject,
) {
    let mut overrides = overrides.to_vec();
    overrides.sort();

    for check in REGISTRY {
        check.update(reference, &overrides, subj);
    }
}

/// Binary search in a sorted override list.
pub(crate) fn has_issue(overrides: &[String], id: &str) -> bool {
    overrides.binary_search_by(|o| o.as_str().cmp(id)).is_ok()
}

/// Version array ordering used for downgrade detection: a shorter array
/// sorts before a longer one; arrays of equal length compare by scanning
/// left to right for a position where `a` falls below `b`.
pub(crate) fn compare_versions(a: &[u32], b: &[u32]) -> bool {
    if a.len() != b.len() {
        return a.len() < b.len();
    }
    for (x, y) in a.iter().zip(b) {
        if x < y {
            return true;
        }
    }
    false
}

/// Folds an evidence version into a baseline version slot. An empty
/// baseline always takes the evidence; otherwise upgrades and downgrades
/// are taken only when the matching flag allows them. Returns whether the
/// baseline changed.
pub(crate) fn merge_version(
    baseline: &mut Vec<u32>,
    evidence: &[u32],
    upgrade: bool,
    downgrade: bool,
) -> bool {
    if evidence.is_empty() {
        return false;
    }
    if baseline.is_empty() {
        *baseline = evidence.to_vec();
        return true;
    }

    let downgraded = compare_versions(evidence, baseline);
    if downgrade && downgraded {
        *baseline = evidence.to_vec();
        return true;
    }

    let upgraded = !downgraded && evidence != baseline.as_slice();
    if upgraded && upgrade {
        *baseline = evidence.to_vec();
        return true;
    }

    false
}

pub(crate) fn print_version(v: &[u32]) -> String {
    v.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

pub(crate) fn has_endpoint_protection(subj: &Subject) -> bool {
    has_windows_epp(subj) || has_linux_eset(subj)
}

pub(crate) fn has_supply_chain(subj: &Subject) -> bool {
    subj.supply_chain
        .as_ref()
        .map(|sc| !sc.data.is_empty() && !sc.certificates.is_empty())
        .unwrap_or(false)
}

/// Renders an X.509 name the way certificate tooling prints it,
/// `CN=..., O=...`. Attributes openssl has no short name for are skipped.
pub(crate) fn name_string(
    name: &openssl::x509::X509NameRef,
) -> String {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let label = match entry.object().nid().short_name() {
            Ok(label) => label,
            Err(_) => continue,
        };
        let value = match entry.data().as_utf8() {
            Ok(value) => value.to_string(),
            Err(_) => continue,
        };
        parts.push(format!("{}={}", label, value));
    }
    parts.join(", ")
}

/// Strips a leading `X:` volume prefix from a Windows path.
pub(crate) fn strip_volume(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
    {
        &path[2..]
    } else {
        path
    }
}

/// Windows endpoint protection: the cold boot log, at least one
/// anti-malware protected process and at least one early-launch
/// anti-malware driver must be present, and at least one of the drivers
/// must show up among the modules the boot log measured.
fn has_windows_epp(subj: &Subject) -> bool {
    let win_log = subj.windows_logs.get(subj.boot_event_log_idx);
    let have_log = win_log.is_some();
    let have_ppl = !subj.anti_malware_processes.is_empty();
    let have_elam = !subj.early_launch_drivers.is_empty();

    let win_log = match win_log {
        Some(w) if have_ppl && have_elam => w,
        _ => {
            warn!(
                "missing data: log {} ppl {} elam {}",
                have_log, have_ppl, have_elam
            );
            return false;
        }
    };

    for path in subj.early_launch_drivers.keys() {
        let module_path = strip_volume(path).to_lowercase();
        let loaded = win_log.loaded_modules.values().any(|lm| {
            strip_volume(&lm.file_path).to_lowercase() == module_path
        });
        if loaded {
            return true;
        }
        info!("early launch driver not loaded: {}", path);
    }
    false
}

/// Linux endpoint protection: the ESET kernel module and every critical
/// daemon binary must appear in the runtime measurement log.
fn has_linux_eset(subj: &Subject) -> bool {
    if subj.ima_log.is_empty() {
        return false;
    }

    let mut module_hit = false;
    let mut critical_hit = [false; eset::CRITICAL_BINARIES_LEN];

    for ev in &subj.ima_log {
        let ng = match &ev.ng {
            Some(ng) => ng,
            None => continue,
        };
        if eset::is_eset_binary(&ng.path) {
            if let Some(i) = eset::critical_binary_index(&ng.path) {
                critical_hit[i] = true;
            }
            continue;
        }
        if eset::is_eset_module(&ng.path) {
            module_hit = true;
        }
    }

    let mut missing = !module_hit;
    for (i, hit) in critical_hit.iter().enumerate() {
        if !hit {
            info!(
                "missing eset binary: {}",
                eset::CRITICAL_BINARIES[i]
            );
            missing = true;
        }
    }
    !missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{self, Buffer};
    use crate::eventlog::marshal::marshal;
    use crate::eventlog::{Event, EventType, HashAlg};
    use crate::issues::Issue;
    use crate::policy;
    use crate::subject::{HashBlob, Subject, SubjectOptions, Values};

    fn subject(values: Values, bline: baseline::Values) -> Subject {
        Subject::new(
            values,
            bline,
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap() //#[allow_ci]
    }

    fn action(msg: &[u8]) -> Event {
        Event {
            sequence: 0,
            index: 5,
            typ: EventType::EfiAction,
            data: msg.to_vec(),
            digest: HashAlg::Sha256.hash(msg).unwrap(), //#[allow_ci]
            alg: HashAlg::Sha256,
        }
    }

    /// Separators on PCR 0-7 and a clean ExitBootServices handover.
    fn measured_boot_log() -> Vec<u8> {
        let mut events: Vec<Event> = (0..8)
            .map(|i| Event {
                sequence: 0,
                index: i,
                typ: EventType::Separator,
                data: vec![0, 0, 0, 0],
                digest: HashAlg::Sha256.hash(&[0, 0, 0, 0]).unwrap(), //#[allow_ci]
                alg: HashAlg::Sha256,
            })
            .collect();
        events.push(action(b"Exit Boot Services Invocation"));
        events.push(action(b"Exit Boot Services Returned with Success"));
        marshal(HashAlg::Sha256, &events).unwrap() //#[allow_ci]
    }

    #[test]
    fn version_ordering() {
        assert!(compare_versions(&[1, 2, 3, 0], &[1, 2, 3, 4]));
        assert!(!compare_versions(&[1, 2, 3, 4], &[1, 2, 3, 4]));
        // a smaller later component wins even after a larger earlier
        // one; downgrade detection errs on the side of reporting
        assert!(compare_versions(&[1, 2, 4, 0], &[1, 2, 3, 4]));
        // shorter arrays sort first, regardless of contents
        assert!(compare_versions(&[9, 9], &[1, 2, 3]));
        assert!(!compare_versions(&[1, 2, 3], &[9, 9]));
    }

    #[test]
    fn merge_version_first_use_and_upgrade() {
        let mut base = Vec::new();
        assert!(merge_version(&mut base, &[1, 2], true, false));
        assert_eq!(base, vec![1, 2]);
        // upgrade taken
        assert!(merge_version(&mut base, &[1, 3], true, false));
        assert_eq!(base, vec![1, 3]);
        // downgrade refused without the flag
        assert!(!merge_version(&mut base, &[1, 0], true, false));
        assert_eq!(base, vec![1, 3]);
        // and taken with it
        assert!(merge_version(&mut base, &[1, 0], true, true));
        assert_eq!(base, vec![1, 0]);
        // idempotent
        assert!(!merge_version(&mut base, &[1, 0], true, true));
    }

    #[test]
    fn merge_version_ignores_empty_evidence() {
        let mut base = vec![4, 5];
        assert!(!merge_version(&mut base, &[], true, true));
        assert_eq!(base, vec![4, 5]);
    }

    #[test]
    fn print_version_is_dotted() {
        assert_eq!(print_version(&[16, 1, 27, 2176]), "16.1.27.2176");
        assert_eq!(print_version(&[]), "");
    }

    #[test]
    fn override_list_lookup() {
        let overrides = vec![
            "csme/downgrade".to_string(),
            "uefi/boot-app-set".to_string(),
        ];
        assert!(has_issue(&overrides, "csme/downgrade"));
        assert!(!has_issue(&overrides, "tpm/dummy"));
    }

    #[test]
    fn volume_prefix_is_stripped() {
        assert_eq!(
            strip_volume("C:\\Windows\\system32\\wd.sys"),
            "\\Windows\\system32\\wd.sys"
        );
        assert_eq!(strip_volume("\\Windows\\wd.sys"), "\\Windows\\wd.sys");
    }

    // A fresh device with no baseline: the first run populates the
    // baseline and raises the modified flag; the second run against the
    // learned baseline is clean and leaves the flag down.
    #[test]
    fn first_contact_learns_then_settles() {
        let reference = Reference::new();
        let mut values = Values::new();
        values.csme_version = vec![16, 0, 15];
        values.event_logs.push(HashBlob {
            data: Buffer(measured_boot_log()),
            ..Default::default()
        });
        let mut subj = subject(values, baseline::Values::new());

        let res = run(&reference, &mut subj);
        let incidents: Vec<&Issue> =
            res.issues.iter().filter(|i| i.incident()).collect();
        assert!(incidents.is_empty(), "incidents: {:?}", incidents);
        assert!(subj.baseline_modified);
        assert_eq!(subj.baseline.csme_version, vec![16, 0, 15]);

        subj.baseline_modified = false;
        let res = run(&reference, &mut subj);
        assert!(res.issues.iter().all(|i| !i.incident()));
        assert!(!subj.baseline_modified);
    }

    // CSME component downgrade: verify reports, plain update keeps the
    // old baseline, override replaces it and the repeat run is clean.
    #[test]
    fn csme_downgrade_needs_an_override() {
        let reference = Reference::new();
        let mut bline = baseline::Values::new();
        bline.csme_version = vec![1, 2, 3, 4];

        let mut values = Values::new();
        values.csme_version = vec![1, 2, 3, 0];

        let mut subj = subject(values, bline);
        let res = run(&reference, &mut subj);
        assert!(res
            .issues
            .iter()
            .any(|i| i.id() == "csme/downgrade"));
        // the plain update pass must not absorb the downgrade
        assert_eq!(subj.baseline.csme_version, vec![1, 2, 3, 4]);

        override_issues(
            &reference,
            &["csme/downgrade".to_string()],
            &mut subj,
        );
        assert!(subj.baseline_modified);
        assert_eq!(subj.baseline.csme_version, vec![1, 2, 3, 0]);

        subj.baseline_modified = false;
        let res = run(&reference, &mut subj);
        assert!(!res.issues.iter().any(|i| i.id() == "csme/downgrade"));
        assert!(!subj.baseline_modified);
    }

    #[test]
    fn override_list_order_does_not_matter() {
        let reference = Reference::new();
        let mut bline = baseline::Values::new();
        bline.csme_version = vec![2, 0];
        let mut values = Values::new();
        values.csme_version = vec![1, 0];
        let mut subj = subject(values, bline);

        // unsorted overrides still hit
        override_issues(
            &reference,
            &[
                "uefi/boot-app-set".to_string(),
                "csme/downgrade".to_string(),
            ],
            &mut subj,
        );
        assert_eq!(subj.baseline.csme_version, vec![1, 0]);
    }

    #[test]
    fn supply_chain_needs_data_and_certificates() {
        use crate::subject::SupplyChainEvidence;

        let mut subj =
            subject(Values::new(), baseline::Values::new());
        assert!(!has_supply_chain(&subj));

        subj.supply_chain = Some(SupplyChainEvidence {
            data: vec![1],
            certificates: vec![],
        });
        assert!(!has_supply_chain(&subj));

        subj.supply_chain = Some(SupplyChainEvidence {
            data: vec![1],
            certificates: vec![vec![2]],
        });
        assert!(has_supply_chain(&subj));
    }
}
