// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! UEFI platform checks: Boot Guard IBB, boot variables, boot
//! applications with TOFU certificate pinning, the partition table,
//! Secure Boot state and key stores, dbx completeness and embedded
//! firmware volumes.

use std::collections::{BTreeSet, HashMap};

use log::info;
use openssl::hash::{hash, MessageDigest};
use openssl::x509::X509;

use super::{has_issue, name_string, Check};
use crate::baseline::{self, BootAppMeasurement};
use crate::boot::ExitBootServices;
use crate::digest::{before_after, DigestSet};
use crate::eventlog::efi::tbs_fingerprint;
use crate::issues::{
    DbxFingerprintsArgs, Issue, SecureBootCertificate, UefiBootAppSetApp,
    UefiBootAppSetArgs, UefiBootFailureArgs, UefiBootOrderArgs,
    UefiBootOrderVariable, UefiGptChangedArgs, UefiGptPartition,
    UefiIbbNoUpdateArgs, UefiNoExitBootSrvArgs, UefiOptionRomSetArgs,
    UefiOptionRomSetDevice, UefiSecureBootKeysArgs,
    UefiSecureBootVariablesArgs,
};
use crate::reference::{DbxArch, Reference};
use crate::subject::Subject;

pub(crate) const INTEL_CPU: &str = "GenuineIntel";
pub(crate) const AMD_CPU: &str = "AuthenticAMD";

/// Splits two keyed digest-set maps into changed, added and removed
/// keys. A key counts as changed only when the two sets disagree on a
/// shared algorithm. Results are sorted.
pub(crate) fn full_diff_sets(
    before: &HashMap<String, DigestSet>,
    after: &HashMap<String, DigestSet>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut changed = Vec::new();
    let mut added = Vec::new();
    let mut removed = Vec::new();

    let keys: BTreeSet<&String> =
        before.keys().chain(after.keys()).collect();
    for key in keys {
        match (before.get(key), after.get(key)) {
            (Some(b), Some(a)) => {
                if !b.intersects_with(a) {
                    changed.push(key.clone());
                }
            }
            (Some(_), None) => removed.push(key.clone()),
            (None, Some(_)) => added.push(key.clone()),
            (None, None) => unreachable!(),
        }
    }
    (changed, added, removed)
}

fn full_diff_boot_apps(
    before: &HashMap<String, BootAppMeasurement>,
    after: &HashMap<String, DigestSet>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let hashes: HashMap<String, DigestSet> = before
        .iter()
        .map(|(k, v)| (k.clone(), v.hash.clone()))
        .collect();
    full_diff_sets(&hashes, after)
}

/// Whether the reported firmware version or release date moved away from
/// the baseline. A firmware update is expected to change boot
/// measurements, so several checks use this to mute their findings.
pub(crate) fn uefi_updated(
    bline: &baseline::Values,
    subj: &Subject,
) -> bool {
    let (ver, date) = match subj.values.platform_version() {
        Some(v) => v,
        None => return false,
    };
    let ver_unchanged =
        bline.bios_version.is_empty() || bline.bios_version == ver;
    let date_unchanged = bline.bios_release_date.is_empty()
        || bline.bios_release_date == date;
    !ver_unchanged || !date_unchanged
}

/// SHA-256 of a boot application's verified signer certificate, in DER.
/// `None` when the application is unsigned or the certificate does not
/// parse.
fn signer_fingerprint(
    signers: &HashMap<String, Vec<u8>>,
    path: &str,
) -> Option<[u8; 32]> {
    let der = signers.get(path)?;
    if X509::from_der(der).is_err() {
        return None;
    }
    let sum = hash(MessageDigest::sha256(), der).ok()?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&sum);
    Some(out)
}

pub struct IntelBootGuard;

impl Check for IntelBootGuard {
    fn name(&self) -> &'static str {
        "Boot Guard"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        // changed IBB measurements are fine iff the firmware updated
        if subj
            .baseline
            .bootguard_ibb
            .intersects_with(&subj.boot.boot_guard_ibb)
        {
            return None;
        }
        let (ver, date) = subj.values.platform_version()?;
        let vendor = subj.values.platform_vendor()?;

        if uefi_updated(&subj.baseline, subj) {
            return None;
        }
        let (before, after) = before_after(
            &subj.baseline.bootguard_ibb,
            &subj.boot.boot_guard_ibb,
        );
        Some(Issue::UefiIbbNoUpdate {
            args: UefiIbbNoUpdateArgs {
                before,
                after,
                vendor: vendor.to_string(),
                release_date: date.to_string(),
                version: ver.to_string(),
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "uefi/ibb-no-update");
        let mut change = false;

        if allow_change {
            change = change
                || subj.baseline.bootguard_ibb != subj.boot.boot_guard_ibb;
            subj.baseline.bootguard_ibb = subj.boot.boot_guard_ibb.clone();
        } else {
            change = subj
                .baseline
                .bootguard_ibb
                .union_with(&subj.boot.boot_guard_ibb)
                || change;
        }

        if let Some((ver, date)) = subj.values.platform_version() {
            let (ver, date) = (ver.to_string(), date.to_string());
            if subj.baseline.bios_version.is_empty() || allow_change {
                change = change || subj.baseline.bios_version != ver;
                subj.baseline.bios_version = ver;
            }
            if subj.baseline.bios_release_date.is_empty() || allow_change {
                change = change || subj.baseline.bios_release_date != date;
                subj.baseline.bios_release_date = date;
            }
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiBootConfig;

impl Check for UefiBootConfig {
    fn name(&self) -> &'static str {
        "UEFI boot config"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty || subj.baseline.boot_variables.is_empty() {
            return None;
        }

        let (changed, added, removed) = full_diff_sets(
            &subj.baseline.boot_variables,
            &subj.boot.boot_variables,
        );
        if changed.is_empty() && added.is_empty() && removed.is_empty() {
            return None;
        }

        let keys: BTreeSet<&String> = subj
            .baseline
            .boot_variables
            .keys()
            .chain(subj.boot.boot_variables.keys())
            .collect();
        let default = DigestSet::default();
        let variables = keys
            .into_iter()
            .map(|key| {
                let b = subj
                    .baseline
                    .boot_variables
                    .get(key)
                    .unwrap_or(&default);
                let a =
                    subj.boot.boot_variables.get(key).unwrap_or(&default);
                let (before, after) = before_after(b, a);
                UefiBootOrderVariable {
                    name: key.clone(),
                    before,
                    after,
                }
            })
            .collect();

        Some(Issue::UefiBootOrder {
            args: UefiBootOrderArgs { variables },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "uefi/boot-order");

        for (key, value) in subj.boot.boot_variables.clone() {
            match subj.baseline.boot_variables.get_mut(&key) {
                Some(slot) if !allow_change => {
                    if slot.union_with(&value) {
                        subj.baseline_modified = true;
                    }
                }
                Some(slot) => {
                    if *slot != value {
                        *slot = value;
                        subj.baseline_modified = true;
                    }
                }
                None => {
                    subj.baseline.boot_variables.insert(key, value);
                    subj.baseline_modified = true;
                }
            }
        }
    }
}

pub struct UefiBootApp;

impl Check for UefiBootApp {
    fn name(&self) -> &'static str {
        "UEFI boot app"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty || subj.baseline.boot_applications.is_empty()
        {
            return None;
        }

        let (changed, added, removed) = full_diff_boot_apps(
            &subj.baseline.boot_applications,
            &subj.boot.boot_applications,
        );
        if changed.is_empty() && added.is_empty() && removed.is_empty() {
            return None;
        }

        // a changed measurement is benign when the new image carries a
        // valid signature by the certificate pinned for that path
        let mut tampered = false;
        for key in &changed {
            let fp =
                signer_fingerprint(&subj.boot_app_signers, key);
            let pinned = subj.baseline.boot_applications[key]
                .pinned_certificate_fingerprint;
            match (fp, pinned) {
                (Some(fp), Some(pin)) if fp == pin => {}
                _ => tampered = true,
            }
        }
        if !tampered && added.is_empty() && removed.is_empty() {
            return None;
        }

        let keys: BTreeSet<&String> = subj
            .baseline
            .boot_applications
            .keys()
            .chain(subj.boot.boot_applications.keys())
            .collect();
        let default = DigestSet::default();
        let apps = keys
            .into_iter()
            .map(|key| {
                let b = subj
                    .baseline
                    .boot_applications
                    .get(key)
                    .map(|m| &m.hash)
                    .unwrap_or(&default);
                let a = subj
                    .boot
                    .boot_applications
                    .get(key)
                    .unwrap_or(&default);
                let (before, after) = before_after(b, a);
                UefiBootAppSetApp {
                    path: key.clone(),
                    before,
                    after,
                }
            })
            .collect();

        Some(Issue::UefiBootAppSet {
            args: UefiBootAppSetArgs { apps },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "uefi/boot-app-set");
        let mut change = false;

        if allow_change || subj.baseline.boot_applications.is_empty() {
            // first use or override: rebuild the set and pin the signer
            // certificate of every signed application
            let mut rebuilt =
                HashMap::with_capacity(subj.boot.boot_applications.len());
            for (key, measured) in &subj.boot.boot_applications {
                let pinned = signer_fingerprint(
                    &subj.boot_app_signers,
                    key,
                );
                rebuilt.insert(
                    key.clone(),
                    BootAppMeasurement {
                        hash: measured.clone(),
                        pinned_certificate_fingerprint: pinned,
                    },
                );
            }
            change = rebuilt != subj.baseline.boot_applications;
            subj.baseline.boot_applications = rebuilt;
        } else {
            // learn new algorithms for apps that did not change
            for (key, measured) in &subj.boot.boot_applications {
                if let Some(m) =
                    subj.baseline.boot_applications.get_mut(key)
                {
                    change = m.hash.union_with(measured) || change;
                }
            }

            // auto-accept changed apps whose pinned signer re-signed
            // them, and pin signers that were not pinned before
            let (changed, _, _) = full_diff_boot_apps(
                &subj.baseline.boot_applications,
                &subj.boot.boot_applications,
            );
            for (key, m) in subj.baseline.boot_applications.iter_mut() {
                let fp = match signer_fingerprint(
                    &subj.boot_app_signers,
                    key,
                ) {
                    Some(fp) => fp,
                    None => continue,
                };
                match m.pinned_certificate_fingerprint {
                    Some(pin) => {
                        if changed.binary_search(key).is_ok() && fp == pin
                        {
                            if let Some(measured) =
                                subj.boot.boot_applications.get(key)
                            {
                                m.hash = measured.clone();
                                change = true;
                            }
                        }
                    }
                    None => {
                        m.pinned_certificate_fingerprint = Some(fp);
                        change = true;
                    }
                }
            }
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiPartitionTable;

impl Check for UefiPartitionTable {
    fn name(&self) -> &'static str {
        "GPT disk"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty {
            return None;
        }
        if subj.baseline.gpt.intersects_with(&subj.boot.gpt) {
            return None;
        }

        let guid = subj
            .boot
            .partition_table_header
            .as_ref()
            .map(|h| h.disk_guid.to_string())
            .unwrap_or_default();
        let partitions = subj
            .boot
            .partitions
            .iter()
            .map(|part| UefiGptPartition {
                guid: part.partition_guid.to_string(),
                typ: part.type_guid.to_string(),
                name: part.name(),
                start: format!("{:x}", part.first_lba),
                end: format!("{:x}", part.last_lba),
            })
            .collect();

        Some(Issue::UefiGptChanged {
            args: UefiGptChangedArgs {
                guid,
                partitions,
                before: String::new(),
                after: String::new(),
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "uefi/gpt-changed");
        let mut change = false;

        if allow_change {
            change = change || subj.baseline.gpt != subj.boot.gpt;
            subj.baseline.gpt = subj.boot.gpt.clone();
        } else {
            change =
                subj.baseline.gpt.union_with(&subj.boot.gpt) || change;
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiSecureBootDisabled;

impl Check for UefiSecureBootDisabled {
    fn name(&self) -> &'static str {
        "UEFI Secure Boot variable check"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty {
            return None;
        }

        // only the on -> off transition is a finding
        let now_on = subj.boot.secure_boot == Some(1);
        if !subj.baseline.secureboot_enabled || now_on {
            return None;
        }

        let render =
            |v: Option<u8>| v.map(|v| v.to_string()).unwrap_or_default();
        Some(Issue::UefiSecureBootVariables {
            args: UefiSecureBootVariablesArgs {
                secure_boot: render(subj.boot.secure_boot),
                audit_mode: render(subj.boot.audit_mode),
                deployed_mode: render(subj.boot.deployed_mode),
                setup_mode: render(subj.boot.setup_mode),
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_off =
            has_issue(overrides, "uefi/secure-boot-variables");
        let secure_boot = subj.boot.secure_boot == Some(1);

        if allow_off
            || (secure_boot && !subj.baseline.secureboot_enabled)
        {
            subj.baseline_modified = subj.baseline_modified
                || subj.baseline.secureboot_enabled != secure_boot;
            subj.baseline.secureboot_enabled = secure_boot;
        }
    }
}

pub struct UefiSecureBootKeys;

impl Check for UefiSecureBootKeys {
    fn name(&self) -> &'static str {
        "UEFI Secure Boot keys unmodified"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty {
            return None;
        }

        let pk_changed =
            !subj.baseline.pk.intersects_with(&subj.boot.pk);
        let kek_changed =
            !subj.baseline.kek.intersects_with(&subj.boot.kek);
        if !pk_changed && !kek_changed {
            return None;
        }

        let conv = |c: &X509| -> Option<SecureBootCertificate> {
            let der = c.to_der().ok()?;
            let fpr = tbs_fingerprint(&der).ok()?;
            Some(SecureBootCertificate {
                fpr: hex::encode(fpr),
                issuer: name_string(c.issuer_name()),
                subject: name_string(c.subject_name()),
                not_before: c.not_before().to_string(),
                not_after: c.not_after().to_string(),
            })
        };

        Some(Issue::UefiSecureBootKeys {
            args: UefiSecureBootKeysArgs {
                pk: subj.boot.pk_parsed.as_ref().and_then(conv),
                kek: subj
                    .boot
                    .kek_parsed
                    .iter()
                    .filter_map(conv)
                    .collect(),
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_keys = has_issue(overrides, "uefi/secure-boot-keys");
        let mut change = false;

        if allow_keys {
            change = change || subj.baseline.pk != subj.boot.pk;
            subj.baseline.pk = subj.boot.pk.clone();
            change = change || subj.baseline.kek != subj.boot.kek;
            subj.baseline.kek = subj.boot.kek.clone();
        } else {
            change = subj.baseline.pk.union_with(&subj.boot.pk) || change;
            change =
                subj.baseline.kek.union_with(&subj.boot.kek) || change;
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiDbx;

impl Check for UefiDbx {
    fn name(&self) -> &'static str {
        "UEFI dbx unmodified"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty {
            return None;
        }

        // any baseline entry missing from the booted dbx means the
        // revocation store shrank; report the whole pinned set
        let missing = subj
            .baseline
            .dbx
            .keys()
            .any(|k| !subj.boot.dbx_contents.contains_key(k));
        if !missing {
            return None;
        }

        let mut fprs: Vec<String> =
            subj.baseline.dbx.keys().cloned().collect();
        fprs.sort();
        Some(Issue::UefiSecureBootDbx {
            args: DbxFingerprintsArgs { fprs },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_dbx = has_issue(overrides, "uefi/secure-boot-dbx");
        let mut change = false;

        if allow_dbx
            || (subj.baseline.dbx.is_empty()
                && !subj.boot.dbx_contents.is_empty())
        {
            subj.baseline.dbx.clear();
            change = true;
        }
        for key in subj.boot.dbx_contents.keys() {
            change =
                subj.baseline.dbx.insert(key.clone(), true).is_none()
                    || change;
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiExitBootServices;

impl Check for UefiExitBootServices {
    fn name(&self) -> &'static str {
        "Exit Boot Services"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty {
            return None;
        }
        if subj.boot.is_lenovo {
            // Lenovo firmware does not measure the ExitBootServices
            // event (seen on X1 Carbon Gen9)
            return None;
        }
        if subj.boot.exit_boot_services == ExitBootServices::Done
            || subj.baseline.allow_missing_exit_boot_services
        {
            return None;
        }
        Some(Issue::UefiNoExitBootSrv {
            args: UefiNoExitBootSrvArgs {
                entered: subj.boot.exit_boot_services
                    != ExitBootServices::Pre,
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if has_issue(overrides, "uefi/no-exit-boot-srv")
            && !subj.baseline.allow_missing_exit_boot_services
        {
            subj.baseline.allow_missing_exit_boot_services = true;
            subj.baseline_modified = true;
        }
    }
}

pub struct UefiSeparators;

impl Check for UefiSeparators {
    fn name(&self) -> &'static str {
        "Separators"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if super::tpm::subject_has_dummy_tpm(reference, subj) {
            return None;
        }

        for index in 0u32..=7 {
            let sep = subj.boot.separators.get(&index);
            let mut errord = !subj.boot.is_empty && sep.is_none();
            if let Some(sep) = sep {
                errord = errord
                    || (!sep.sha1.is_empty() && sep.sha1 != [0, 0, 0, 0]);
                errord = errord
                    || (!sep.sha256.is_empty()
                        && sep.sha256 != [0, 0, 0, 0]);
            }
            let whitelisted = subj
                .baseline
                .allow_boot_failure
                .binary_search(&index)
                .is_ok();
            if errord && !whitelisted {
                let pcr = |i: u32| {
                    subj.boot
                        .separators
                        .get(&i)
                        .map(|s| hex::encode(&s.sha256))
                        .unwrap_or_default()
                };
                return Some(Issue::UefiBootFailure {
                    args: UefiBootFailureArgs {
                        pcr0: pcr(0),
                        pcr1: pcr(1),
                        pcr2: pcr(2),
                        pcr3: pcr(3),
                        pcr4: pcr(4),
                        pcr5: pcr(5),
                        pcr6: pcr(6),
                        pcr7: pcr(7),
                    },
                });
            }
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if !has_issue(overrides, "uefi/boot-failure") {
            return;
        }
        let mut change = false;
        for index in 0u32..=7 {
            if let Err(pos) =
                subj.baseline.allow_boot_failure.binary_search(&index)
            {
                subj.baseline.allow_boot_failure.insert(pos, index);
                change = true;
            }
        }
        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiOfficialDbx;

fn official_dbx_arch(subj: &Subject) -> Option<DbxArch> {
    if subj.values.cpu_vendor != INTEL_CPU
        && subj.values.cpu_vendor != AMD_CPU
    {
        return None;
    }
    if subj.values.amd64? {
        Some(DbxArch::Amd64)
    } else {
        Some(DbxArch::X86)
    }
}

fn missing_revocations(
    reference: &Reference,
    arch: DbxArch,
    subj: &Subject,
) -> Vec<String> {
    let official = match reference.dbx_fingerprints(arch) {
        Some(set) => set,
        None => return Vec::new(),
    };
    let mut misses: Vec<String> = official
        .iter()
        .filter(|fpr| {
            !subj.boot.dbx_contents.get(*fpr).copied().unwrap_or(false)
        })
        .cloned()
        .collect();
    misses.sort();
    misses
}

impl Check for UefiOfficialDbx {
    fn name(&self) -> &'static str {
        "Official UEFI dbx"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let arch = official_dbx_arch(subj)?;
        let fprs: Vec<String> =
            missing_revocations(reference, arch, subj)
                .into_iter()
                .filter(|fpr| {
                    subj.baseline
                        .revoked_key_whitelist
                        .binary_search(fpr)
                        .is_err()
                })
                .collect();
        if fprs.is_empty() {
            return None;
        }
        Some(Issue::UefiOfficialDbx {
            args: DbxFingerprintsArgs { fprs },
        })
    }

    fn update(
        &self,
        reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if !has_issue(overrides, "uefi/official-dbx") {
            return;
        }
        let arch = match official_dbx_arch(subj) {
            Some(arch) => arch,
            None => return,
        };
        let mut change = false;
        for fpr in missing_revocations(reference, arch, subj) {
            if let Err(pos) =
                subj.baseline.revoked_key_whitelist.binary_search(&fpr)
            {
                subj.baseline.revoked_key_whitelist.insert(pos, fpr);
                change = true;
            }
        }
        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct UefiEmbeddedFirmware;

impl Check for UefiEmbeddedFirmware {
    fn name(&self) -> &'static str {
        "UEFI embedded firmware"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.boot.is_empty
            || subj.baseline.embedded_firmware.is_empty()
        {
            return None;
        }

        let (changed, _, _) = full_diff_sets(
            &subj.baseline.embedded_firmware,
            &subj.boot.embedded_firmware,
        );
        if changed.is_empty() || uefi_updated(&subj.baseline, subj) {
            return None;
        }

        info!("embedded firmware changed: {:?}", changed);
        let devices = changed
            .iter()
            .map(|addr| {
                let (before, after) = before_after(
                    &subj.baseline.embedded_firmware[addr],
                    &subj.boot.embedded_firmware[addr],
                );
                UefiOptionRomSetDevice {
                    address: addr.clone(),
                    before,
                    after,
                    name: String::new(),
                    vendor: String::new(),
                }
            })
            .collect();
        Some(Issue::UefiOptionRomSet {
            args: UefiOptionRomSetArgs { devices },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "uefi/option-rom-set")
            || uefi_updated(&subj.baseline, subj);
        let mut change = false;

        if allow_change || subj.baseline.embedded_firmware.is_empty() {
            let rebuilt = subj.boot.embedded_firmware.clone();
            change =
                change || subj.baseline.embedded_firmware != rebuilt;
            subj.baseline.embedded_firmware = rebuilt;
        } else {
            for (key, value) in &subj.boot.embedded_firmware {
                if let Some(slot) =
                    subj.baseline.embedded_firmware.get_mut(key)
                {
                    change = slot.union_with(value) || change;
                }
            }
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::Separator;
    use crate::policy;
    use crate::subject::{PlatformInfo, SubjectOptions, Values};

    fn subject(values: Values, bline: baseline::Values) -> Subject {
        let mut subj = Subject::new(
            values,
            bline,
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap(); //#[allow_ci]
        subj.boot.is_empty = false;
        subj
    }

    fn sha256_set(data: &[u8]) -> DigestSet {
        let sum = hash(MessageDigest::sha256(), data).unwrap(); //#[allow_ci]
        DigestSet::new(&sum).unwrap() //#[allow_ci]
    }

    fn sha1_set(data: &[u8]) -> DigestSet {
        let sum = hash(MessageDigest::sha1(), data).unwrap(); //#[allow_ci]
        DigestSet::new(&sum).unwrap() //#[allow_ci]
    }

    fn platform(version: &str, date: &str) -> Option<PlatformInfo> {
        Some(PlatformInfo {
            vendor: "ACME".to_string(),
            version: version.to_string(),
            release_date: date.to_string(),
        })
    }

    #[test]
    fn diff_classifies_keys() {
        let mut before = HashMap::new();
        before.insert("a".to_string(), sha256_set(b"1"));
        before.insert("b".to_string(), sha256_set(b"2"));
        before.insert("c".to_string(), sha256_set(b"3"));
        let mut after = HashMap::new();
        after.insert("a".to_string(), sha256_set(b"1"));
        after.insert("b".to_string(), sha256_set(b"x"));
        after.insert("d".to_string(), sha256_set(b"4"));

        let (changed, added, removed) = full_diff_sets(&before, &after);
        assert_eq!(changed, vec!["b"]);
        assert_eq!(added, vec!["d"]);
        assert_eq!(removed, vec!["c"]);
    }

    #[test]
    fn diff_tolerates_disjoint_algorithms() {
        let mut before = HashMap::new();
        before.insert("a".to_string(), sha1_set(b"1"));
        let mut after = HashMap::new();
        after.insert("a".to_string(), sha256_set(b"1"));
        let (changed, added, removed) = full_diff_sets(&before, &after);
        assert!(changed.is_empty());
        assert!(added.is_empty());
        assert!(removed.is_empty());
    }

    #[test]
    fn ibb_change_without_firmware_update() {
        let mut bline = baseline::Values::new();
        bline.bootguard_ibb = sha256_set(b"old ibb");
        bline.bios_version = "1.0".to_string();
        bline.bios_release_date = "01/01/2025".to_string();
        let mut values = Values::new();
        values.platform = platform("1.0", "01/01/2025");

        let mut subj = subject(values, bline);
        subj.boot.boot_guard_ibb = sha256_set(b"new ibb");

        let iss = IntelBootGuard
            .verify(&Reference::new(), &subj)
            .expect("ibb"); //#[allow_ci]
        assert_eq!(iss.id(), "uefi/ibb-no-update");

        // with a version bump the same change is silent
        subj.values.platform = platform("1.1", "02/02/2026");
        assert!(IntelBootGuard
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn new_digest_bank_widens_the_baseline_silently() {
        // a firmware update turning on SHA-256 measurements must not
        // trip devices recorded with SHA-1 only
        let mut bline = baseline::Values::new();
        bline.bootguard_ibb = sha1_set(b"ibb");
        let mut values = Values::new();
        values.platform = platform("1.0", "01/01/2025");

        let mut subj = subject(values, bline);
        subj.boot.boot_guard_ibb = sha256_set(b"ibb");

        assert!(IntelBootGuard
            .verify(&Reference::new(), &subj)
            .is_none());

        IntelBootGuard.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline_modified);
        assert!(subj.baseline.bootguard_ibb.sha1.is_some());
        assert!(subj.baseline.bootguard_ibb.sha256.is_some());
        // with both banks on record a changed SHA-256 is caught again
        subj.boot.boot_guard_ibb = sha256_set(b"other ibb");
        assert!(IntelBootGuard
            .verify(&Reference::new(), &subj)
            .is_some());
    }

    #[test]
    fn boot_variable_change_lists_all_variables() {
        let mut bline = baseline::Values::new();
        bline
            .boot_variables
            .insert("Boot0000".to_string(), sha256_set(b"a"));
        bline
            .boot_variables
            .insert("BootOrder".to_string(), sha256_set(b"order"));
        let mut subj = subject(Values::new(), bline);
        subj.boot
            .boot_variables
            .insert("Boot0000".to_string(), sha256_set(b"b"));
        subj.boot
            .boot_variables
            .insert("BootOrder".to_string(), sha256_set(b"order"));

        match UefiBootConfig.verify(&Reference::new(), &subj) {
            Some(Issue::UefiBootOrder { args }) => {
                assert_eq!(args.variables.len(), 2);
                assert_eq!(args.variables[0].name, "Boot0000");
                assert_ne!(
                    args.variables[0].before,
                    args.variables[0].after
                );
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn boot_app_change_without_pin_is_reported() {
        let mut bline = baseline::Values::new();
        bline.boot_applications.insert(
            "\\EFI\\BOOT\\BOOTX64.EFI".to_string(),
            BootAppMeasurement {
                hash: sha256_set(b"bootmgr v1"),
                pinned_certificate_fingerprint: None,
            },
        );
        let mut subj = subject(Values::new(), bline);
        subj.boot.boot_applications.insert(
            "\\EFI\\BOOT\\BOOTX64.EFI".to_string(),
            sha256_set(b"bootmgr v2"),
        );

        let iss = UefiBootApp
            .verify(&Reference::new(), &subj)
            .expect("boot app"); //#[allow_ci]
        assert_eq!(iss.id(), "uefi/boot-app-set");
    }

    #[test]
    fn first_use_learns_boot_apps() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        subj.boot.boot_applications.insert(
            "\\EFI\\BOOT\\BOOTX64.EFI".to_string(),
            sha256_set(b"bootmgr"),
        );
        assert!(UefiBootApp.verify(&Reference::new(), &subj).is_none());
        UefiBootApp.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline_modified);
        assert_eq!(subj.baseline.boot_applications.len(), 1);
    }

    #[test]
    fn boot_app_update_settles_after_first_contact() {
        // a subject with no boot applications at all must not raise the
        // modified flag on any pass
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        UefiBootApp.update(&Reference::new(), &[], &mut subj);
        assert!(!subj.baseline_modified);

        // first contact learns; the identical next boot is quiet
        subj.boot.boot_applications.insert(
            "\\EFI\\BOOT\\BOOTX64.EFI".to_string(),
            sha256_set(b"bootmgr"),
        );
        UefiBootApp.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline_modified);

        subj.baseline_modified = false;
        UefiBootApp.update(&Reference::new(), &[], &mut subj);
        assert!(!subj.baseline_modified);
    }

    #[test]
    fn secure_boot_off_after_on_is_reported() {
        let mut bline = baseline::Values::new();
        bline.secureboot_enabled = true;
        let mut subj = subject(Values::new(), bline);
        subj.boot.secure_boot = Some(0);
        subj.boot.setup_mode = Some(0);

        match UefiSecureBootDisabled.verify(&Reference::new(), &subj) {
            Some(Issue::UefiSecureBootVariables { args }) => {
                assert_eq!(args.secure_boot, "0");
                assert_eq!(args.setup_mode, "0");
                assert_eq!(args.audit_mode, "");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        // plain update must not learn the off state
        UefiSecureBootDisabled.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline.secureboot_enabled);

        UefiSecureBootDisabled.update(
            &Reference::new(),
            &["uefi/secure-boot-variables".to_string()],
            &mut subj,
        );
        assert!(!subj.baseline.secureboot_enabled);
        assert!(subj.baseline_modified);
    }

    #[test]
    fn secure_boot_never_enabled_is_silent() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        subj.boot.secure_boot = Some(0);
        assert!(UefiSecureBootDisabled
            .verify(&Reference::new(), &subj)
            .is_none());

        // turning it on is learned as the new normal
        subj.boot.secure_boot = Some(1);
        UefiSecureBootDisabled.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline.secureboot_enabled);
    }

    #[test]
    fn shrunk_dbx_reports_pinned_set() {
        let mut bline = baseline::Values::new();
        bline.dbx.insert("aa".to_string(), true);
        bline.dbx.insert("bb".to_string(), true);
        let mut subj = subject(Values::new(), bline);
        subj.boot.dbx_contents.insert("aa".to_string(), true);

        match UefiDbx.verify(&Reference::new(), &subj) {
            Some(Issue::UefiSecureBootDbx { args }) => {
                assert_eq!(args.fprs, vec!["aa", "bb"]);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        // a growing dbx is fine and gets absorbed
        subj.boot.dbx_contents.insert("bb".to_string(), true);
        subj.boot.dbx_contents.insert("cc".to_string(), true);
        assert!(UefiDbx.verify(&Reference::new(), &subj).is_none());
        UefiDbx.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline.dbx.contains_key("cc"));
    }

    #[test]
    fn missing_separator_is_a_boot_failure() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        for index in 0..=7u32 {
            if index == 4 {
                continue;
            }
            subj.boot.separators.insert(
                index,
                Separator {
                    sha1: vec![0, 0, 0, 0],
                    sha256: vec![0, 0, 0, 0],
                },
            );
        }
        let iss = UefiSeparators
            .verify(&Reference::new(), &subj)
            .expect("separator"); //#[allow_ci]
        assert_eq!(iss.id(), "uefi/boot-failure");

        // whitelisting via override silences the finding
        UefiSeparators.update(
            &Reference::new(),
            &["uefi/boot-failure".to_string()],
            &mut subj,
        );
        assert_eq!(
            subj.baseline.allow_boot_failure,
            vec![0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert!(UefiSeparators
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn nonzero_separator_payload_is_a_boot_failure() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        for index in 0..=7u32 {
            subj.boot.separators.insert(
                index,
                Separator {
                    sha1: Vec::new(),
                    sha256: if index == 2 {
                        vec![1, 2, 3, 4]
                    } else {
                        vec![0, 0, 0, 0]
                    },
                },
            );
        }
        assert!(UefiSeparators
            .verify(&Reference::new(), &subj)
            .is_some());
    }

    #[test]
    fn official_dbx_misses_reported_and_whitelisted() {
        let mut reference = Reference::new();
        reference.add_dbx_fingerprints(
            DbxArch::Amd64,
            ["aa".to_string(), "bb".to_string()],
        );

        let mut values = Values::new();
        values.cpu_vendor = INTEL_CPU.to_string();
        values.amd64 = Some(true);
        let mut subj = subject(values, baseline::Values::new());
        subj.boot.dbx_contents.insert("aa".to_string(), true);

        match UefiOfficialDbx.verify(&reference, &subj) {
            Some(Issue::UefiOfficialDbx { args }) => {
                assert_eq!(args.fprs, vec!["bb"]);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        UefiOfficialDbx.update(
            &reference,
            &["uefi/official-dbx".to_string()],
            &mut subj,
        );
        assert_eq!(subj.baseline.revoked_key_whitelist, vec!["bb"]);
        assert!(UefiOfficialDbx.verify(&reference, &subj).is_none());
    }

    #[test]
    fn official_dbx_needs_a_known_cpu() {
        let reference = Reference::new();
        let mut values = Values::new();
        values.cpu_vendor = "SomeARM".to_string();
        values.amd64 = Some(false);
        let subj = subject(values, baseline::Values::new());
        assert!(UefiOfficialDbx.verify(&reference, &subj).is_none());
    }

    #[test]
    fn embedded_firmware_change_muted_by_update() {
        let mut bline = baseline::Values::new();
        bline
            .embedded_firmware
            .insert("ff200000".to_string(), sha256_set(b"rom v1"));
        bline.bios_version = "1.0".to_string();
        let mut values = Values::new();
        values.platform = platform("1.0", "");
        let mut subj = subject(values, bline);
        subj.boot
            .embedded_firmware
            .insert("ff200000".to_string(), sha256_set(b"rom v2"));

        let iss = UefiEmbeddedFirmware
            .verify(&Reference::new(), &subj)
            .expect("embedded fw"); //#[allow_ci]
        assert_eq!(iss.id(), "uefi/option-rom-set");

        subj.values.platform = platform("2.0", "");
        assert!(UefiEmbeddedFirmware
            .verify(&Reference::new(), &subj)
            .is_none());
        // and the update pass re-pins the new measurements
        UefiEmbeddedFirmware.update(&Reference::new(), &[], &mut subj);
        assert_eq!(
            subj.baseline.embedded_firmware["ff200000"],
            sha256_set(b"rom v2")
        );
    }
}
