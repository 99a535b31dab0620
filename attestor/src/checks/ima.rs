// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Linux IMA checks: replay of the runtime measurement log against the
//! quoted PCR banks, the boot aggregate and policy-protected file
//! measurements.

use log::info;
use openssl::hash::{hash, Hasher, MessageDigest};

use super::{has_issue, Check};
use crate::digest::{before_after, DigestSet};
use crate::eventlog::ima::{verify_ima, ImaError};
use crate::eventlog::HashAlg;
use crate::issues::{
    ImaBootAggregateArgs, ImaInvalidLogArgs, ImaInvalidLogPcr,
    ImaRuntimeMeasurementsArgs, Issue,
};
use crate::issues::FileChange;
use crate::reference::Reference;
use crate::subject::Subject;

pub struct ImaLog;

impl Check for ImaLog {
    fn name(&self) -> &'static str {
        "IMA runtime measurement log"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.ima_log.is_empty() {
            return None;
        }
        if super::tpm::subject_has_dummy_tpm(reference, subj) {
            return None;
        }

        // the log must replay against at least one quoted bank
        let mut hit = false;
        let mut pcr: Vec<ImaInvalidLogPcr> = Vec::new();
        let mut banks: Vec<&String> = subj.values.pcr.keys().collect();
        banks.sort();
        for algo in banks {
            let alg = match algo.as_str() {
                "4" => HashAlg::Sha1,
                "11" => HashAlg::Sha256,
                _ => {
                    info!("unknown pcr bank algorithm {}", algo);
                    continue;
                }
            };
            let bank = &subj.values.pcr[algo];
            match verify_ima(&subj.ima_log, bank, alg) {
                Ok(_) => hit = true,
                Err(ImaError::Replay(err)) => {
                    pcr = err
                        .invalid_pcrs
                        .iter()
                        .map(|(number, computed)| ImaInvalidLogPcr {
                            number: number.clone(),
                            computed: computed.clone(),
                            quoted: bank
                                .get(number)
                                .cloned()
                                .unwrap_or_default(),
                        })
                        .collect();
                    pcr.sort_by(|a, b| a.number.cmp(&b.number));
                    info!("ima log replay failed in bank {}", algo);
                }
                Err(err) => {
                    info!("ima log in bank {}: {}", algo, err);
                }
            }
        }

        if !hit && !subj.baseline.allow_invalid_ima_log {
            return Some(Issue::ImaInvalidLog {
                args: ImaInvalidLogArgs { pcr },
            });
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if has_issue(overrides, "ima/invalid-log")
            && !subj.baseline.allow_invalid_ima_log
        {
            subj.baseline.allow_invalid_ima_log = true;
            subj.baseline_modified = true;
        }
    }
}

pub struct ImaBootAggregate;

/// SHA-1 of the quoted SHA-1 PCRs 0 through 7, the value IMA logs as its
/// first record.
fn boot_aggregate(subj: &Subject) -> Option<DigestSet> {
    let mut agg = DigestSet::default();
    if let Some(bank) = subj.values.pcr.get("4") {
        let mut h = Hasher::new(MessageDigest::sha1()).ok()?;
        for index in 0..8 {
            if let Some(quoted) = bank.get(&index.to_string()) {
                if let Ok(raw) = hex::decode(quoted) {
                    h.update(&raw).ok()?;
                }
            }
        }
        let sum = h.finish().ok()?;
        agg.union_with(&DigestSet::new(&sum).ok()?);
    }
    Some(agg)
}

impl Check for ImaBootAggregate {
    fn name(&self) -> &'static str {
        "IMA boot aggregate"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let agg = boot_aggregate(subj)?;
        if subj.boot.boot_aggregate.intersects_with(&agg) {
            return None;
        }
        let (computed, logged) =
            before_after(&agg, &subj.boot.boot_aggregate);
        Some(Issue::ImaBootAggregate {
            args: ImaBootAggregateArgs { computed, logged },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "ima/boot-aggregate");
        let change = if allow_change {
            let change =
                subj.baseline.boot_aggregate != subj.boot.boot_aggregate;
            subj.baseline.boot_aggregate =
                subj.boot.boot_aggregate.clone();
            change
        } else {
            subj.baseline
                .boot_aggregate
                .union_with(&subj.boot.boot_aggregate)
        };
        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct ImaFiles;

impl Check for ImaFiles {
    fn name(&self) -> &'static str {
        "Protected file measurements"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.baseline.file_measurements.is_empty() {
            return None;
        }

        let mut files = Vec::new();
        for file in &subj.policy.protected_files {
            let measured = match subj.boot.files.get(&file.path) {
                Some(m) => m,
                None => continue,
            };
            let pinned =
                match subj.baseline.file_measurements.get(&file.path) {
                    Some(p) => p,
                    None => continue,
                };
            if !measured.intersects_with(pinned) {
                let (before, after) = before_after(pinned, measured);
                files.push(FileChange {
                    path: file.path.clone(),
                    before,
                    after,
                });
            }
        }
        if files.is_empty() {
            return None;
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Some(Issue::ImaRuntimeMeasurements {
            args: ImaRuntimeMeasurementsArgs { files },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change =
            has_issue(overrides, "ima/runtime-measurements");
        let mut change = false;

        for file in &subj.policy.protected_files {
            let measured = subj.boot.files.get(&file.path);
            if allow_change {
                change = true;
                match measured {
                    Some(m) => {
                        subj.baseline
                            .file_measurements
                            .insert(file.path.clone(), m.clone());
                    }
                    None => {
                        subj.baseline
                            .file_measurements
                            .remove(&file.path);
                    }
                }
            } else if let Some(m) = measured {
                match subj.baseline.file_measurements.get_mut(&file.path)
                {
                    Some(pinned) => {
                        change = pinned.union_with(m) || change;
                    }
                    None => {
                        change = true;
                        subj.baseline
                            .file_measurements
                            .insert(file.path.clone(), m.clone());
                    }
                }
            }
        }
        subj.baseline_modified = subj.baseline_modified || change;
    }
}
