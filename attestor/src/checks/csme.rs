// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Intel CSME firmware checks: version rollback and silent component
//! swaps. Versions arrive from two sides, the runtime-reported firmware
//! version triple and the per-component manifest versions from the
//! measured boot log.

use log::info;

use super::{compare_versions, has_issue, merge_version, print_version, Check};
use crate::baseline::Buffer;
use crate::eventlog::csme::measured_entity_name;
use crate::issues::{
    CsmeComponentChange, CsmeDowngradeArgs, CsmeNoUpdateArgs,
    CsmeNoUpdateComponent, Issue,
};
use crate::reference::Reference;
use crate::subject::Subject;

/// Both change predicates over a pair of version arrays. `unchanged` is
/// deep equality; `downgraded` uses the engine's version ordering and
/// only fires when a baseline exists. The two are deliberately
/// independent: an array can be neither unchanged nor downgraded.
fn csme_version_check(before: &[u32], after: &[u32]) -> (bool, bool) {
    let unchanged = before == after;
    let downgraded = !before.is_empty() && compare_versions(after, before);
    (unchanged, downgraded)
}

fn manifest_version(version: &[u16; 4]) -> Vec<u32> {
    version.iter().map(|v| *v as u32).collect()
}

fn sorted_component_keys(subj: &Subject) -> Vec<u8> {
    let mut keys: Vec<u8> =
        subj.boot.csme_component_versions.keys().copied().collect();
    keys.sort_unstable();
    keys
}

pub struct CsmeDowngrade;

impl Check for CsmeDowngrade {
    fn name(&self) -> &'static str {
        "CSME downgrade attack"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let mut args = CsmeDowngradeArgs::default();

        if let Some((ver, rec, fitc)) = subj.values.csme_versions() {
            let (_, ver_down) =
                csme_version_check(&subj.baseline.csme_version, ver);
            let (_, fitc_down) =
                csme_version_check(&subj.baseline.csme_fitc, fitc);
            let (_, rec_down) =
                csme_version_check(&subj.baseline.csme_recovery, rec);

            if ver_down || fitc_down || rec_down {
                info!("csme downgraded");
                args.combined = Some(CsmeComponentChange {
                    before: print_version(&subj.baseline.csme_version),
                    after: print_version(ver),
                    name: String::new(),
                });
            }
        }

        for key in sorted_component_keys(subj) {
            let manifest = &subj.boot.csme_component_versions[&key];
            let prev = match subj.baseline.csme_component_version.get(&key)
            {
                Some(prev) => prev,
                None => continue,
            };
            let val = manifest_version(&manifest.version);
            let (_, downgraded) = csme_version_check(prev, &val);
            if downgraded {
                let name = measured_entity_name(0, key);
                info!("csme component {} downgraded", name);
                args.components.push(CsmeComponentChange {
                    name,
                    before: print_version(prev),
                    after: print_version(&val),
                });
            }
        }

        if args.combined.is_some() || !args.components.is_empty() {
            Some(Issue::CsmeDowngrade { args })
        } else {
            None
        }
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_downgrade = has_issue(overrides, "csme/downgrade");
        let mut change = false;

        if let Some((ver, rec, fitc)) = subj.values.csme_versions() {
            let (ver, rec, fitc) =
                (ver.to_vec(), rec.to_vec(), fitc.to_vec());
            change |= merge_version(
                &mut subj.baseline.csme_version,
                &ver,
                true,
                allow_downgrade,
            );
            change |= merge_version(
                &mut subj.baseline.csme_fitc,
                &fitc,
                true,
                allow_downgrade,
            );
            change |= merge_version(
                &mut subj.baseline.csme_recovery,
                &rec,
                true,
                allow_downgrade,
            );
        }

        for key in sorted_component_keys(subj) {
            let evidence =
                manifest_version(&subj.boot.csme_component_versions[&key].version);
            let slot = subj
                .baseline
                .csme_component_version
                .entry(key)
                .or_default();
            change |= merge_version(slot, &evidence, true, allow_downgrade);
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

pub struct CsmeNoUpdate;

impl Check for CsmeNoUpdate {
    fn name(&self) -> &'static str {
        "CSME runtime measurements"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let csme_unchanged =
            subj.values.csme_versions().map(|(ver, rec, fitc)| {
                let (v, _) =
                    csme_version_check(&subj.baseline.csme_version, ver);
                let (f, _) =
                    csme_version_check(&subj.baseline.csme_fitc, fitc);
                let (r, _) =
                    csme_version_check(&subj.baseline.csme_recovery, rec);
                v && f && r
            });

        let mut args = CsmeNoUpdateArgs::default();
        for key in sorted_component_keys(subj) {
            let manifest = &subj.boot.csme_component_versions[&key];
            let prev = match subj.baseline.csme_component_version.get(&key)
            {
                Some(prev) => prev,
                None => continue,
            };
            let val = manifest_version(&manifest.version);
            let (unchanged, _) = csme_version_check(prev, &val);

            let prev_hash =
                match subj.baseline.csme_component_hash.get(&key) {
                    Some(h) => &h.0,
                    None => continue,
                };
            let hash = match subj.boot.csme_component_hash.get(&key) {
                Some(h) => h,
                None => continue,
            };
            if prev_hash == hash {
                continue;
            }

            let name = measured_entity_name(0, key);
            let comp = CsmeNoUpdateComponent {
                name: name.clone(),
                before: hex::encode(prev_hash),
                after: hex::encode(hash),
                version: print_version(&val),
            };

            // a changed measurement is only suspicious when neither the
            // firmware as a whole nor the component claims a new version
            if csme_unchanged == Some(true) {
                info!("{}: changed w/o csme update", name);
                args.components.push(comp);
            } else if unchanged {
                info!("{}: changed w/o component update", name);
                args.components.push(comp);
            }
        }

        if args.components.is_empty() {
            None
        } else {
            Some(Issue::CsmeNoUpdate { args })
        }
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_no_upgrade = has_issue(overrides, "csme/no-update");
        let mut runtime_change = false;
        let mut change = false;

        if let Some((ver, rec, fitc)) = subj.values.csme_versions() {
            let (ver, rec, fitc) =
                (ver.to_vec(), rec.to_vec(), fitc.to_vec());
            runtime_change |= merge_version(
                &mut subj.baseline.csme_version,
                &ver,
                true,
                false,
            );
            runtime_change |= merge_version(
                &mut subj.baseline.csme_fitc,
                &fitc,
                true,
                false,
            );
            runtime_change |= merge_version(
                &mut subj.baseline.csme_recovery,
                &rec,
                true,
                false,
            );
        }

        for key in sorted_component_keys(subj) {
            let evidence =
                manifest_version(&subj.boot.csme_component_versions[&key].version);
            let hash_evidence =
                subj.boot.csme_component_hash.get(&key).cloned();
            let hash_in_baseline =
                subj.baseline.csme_component_hash.contains_key(&key);

            // no pinned measurement yet: accept whatever booted
            let mut update_hash =
                !hash_in_baseline && hash_evidence.is_some();

            // replace a pinned measurement only when the firmware
            // updated or the operator overrode the finding
            if let Some(hash) = &hash_evidence {
                if hash_in_baseline
                    && (allow_no_upgrade || runtime_change)
                    && subj.baseline.csme_component_hash[&key].0 != *hash
                {
                    update_hash = true;
                }
            }

            let slot = subj
                .baseline
                .csme_component_version
                .entry(key)
                .or_default();
            if merge_version(slot, &evidence, true, false) {
                change = true;
                update_hash = hash_evidence.is_some();
            }

            if update_hash {
                if let Some(hash) = hash_evidence {
                    subj.baseline
                        .csme_component_hash
                        .insert(key, Buffer(hash));
                    change = true;
                }
            }
        }

        subj.baseline_modified =
            subj.baseline_modified || change || runtime_change;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline;
    use crate::eventlog::csme::ManifestVersion;
    use crate::policy;
    use crate::subject::{SubjectOptions, Values};

    fn subject(values: Values, bline: baseline::Values) -> Subject {
        Subject::new(
            values,
            bline,
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap() //#[allow_ci]
    }

    fn manifest(version: [u16; 4]) -> ManifestVersion {
        ManifestVersion {
            version,
            ..ManifestVersion::default()
        }
    }

    #[test]
    fn predicates_are_independent() {
        // upgrade: neither unchanged nor downgraded
        assert_eq!(csme_version_check(&[1, 2], &[1, 3]), (false, false));
        // equal
        assert_eq!(csme_version_check(&[1, 2], &[1, 2]), (true, false));
        // downgrade
        assert_eq!(csme_version_check(&[1, 2], &[1, 1]), (false, true));
        // empty baseline never downgrades
        assert_eq!(csme_version_check(&[], &[1, 1]), (false, false));
    }

    #[test]
    fn runtime_downgrade_reported() {
        let mut bline = baseline::Values::new();
        bline.csme_version = vec![16, 1, 27];
        let mut values = Values::new();
        values.csme_version = vec![16, 1, 25];
        let subj = subject(values, bline);

        let iss = CsmeDowngrade
            .verify(&Reference::new(), &subj)
            .expect("downgrade"); //#[allow_ci]
        match iss {
            Issue::CsmeDowngrade { args } => {
                let combined = args.combined.expect("combined"); //#[allow_ci]
                assert_eq!(combined.before, "16.1.27");
                assert_eq!(combined.after, "16.1.25");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn component_downgrade_reported_by_name() {
        let mut bline = baseline::Values::new();
        bline
            .csme_component_version
            .insert(3, vec![2, 0, 0, 7]);
        let mut subj = subject(Values::new(), bline);
        subj.boot
            .csme_component_versions
            .insert(3, manifest([2, 0, 0, 5]));

        let iss = CsmeDowngrade
            .verify(&Reference::new(), &subj)
            .expect("downgrade"); //#[allow_ci]
        match iss {
            Issue::CsmeDowngrade { args } => {
                assert!(args.combined.is_none());
                assert_eq!(args.components.len(), 1);
                assert_eq!(
                    args.components[0].name,
                    measured_entity_name(0, 3)
                );
                assert_eq!(args.components[0].after, "2.0.0.5");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn unknown_component_is_first_use() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        subj.boot
            .csme_component_versions
            .insert(2, manifest([1, 0, 0, 0]));
        subj.boot.csme_component_hash.insert(2, vec![0xaa; 32]);

        assert!(CsmeDowngrade
            .verify(&Reference::new(), &subj)
            .is_none());
        assert!(CsmeNoUpdate.verify(&Reference::new(), &subj).is_none());

        CsmeNoUpdate.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline_modified);
        assert_eq!(
            subj.baseline.csme_component_version[&2],
            vec![1, 0, 0, 0]
        );
        assert_eq!(
            subj.baseline.csme_component_hash[&2].0,
            vec![0xaa; 32]
        );
    }

    #[test]
    fn changed_hash_without_version_bump_is_reported() {
        let mut bline = baseline::Values::new();
        bline.csme_version = vec![16, 0];
        bline
            .csme_component_version
            .insert(2, vec![1, 0, 0, 0]);
        bline
            .csme_component_hash
            .insert(2, Buffer(vec![0xaa; 32]));

        let mut values = Values::new();
        values.csme_version = vec![16, 0];
        let mut subj = subject(values, bline);
        subj.boot
            .csme_component_versions
            .insert(2, manifest([1, 0, 0, 0]));
        subj.boot.csme_component_hash.insert(2, vec![0xbb; 32]);

        let iss = CsmeNoUpdate
            .verify(&Reference::new(), &subj)
            .expect("no-update"); //#[allow_ci]
        match iss {
            Issue::CsmeNoUpdate { args } => {
                assert_eq!(args.components.len(), 1);
                assert_eq!(args.components[0].before, hex::encode([0xaa; 32]));
                assert_eq!(args.components[0].after, hex::encode([0xbb; 32]));
                assert_eq!(args.components[0].version, "1.0.0.0");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        // without an override the pinned measurement stays
        CsmeNoUpdate.update(&Reference::new(), &[], &mut subj);
        assert_eq!(
            subj.baseline.csme_component_hash[&2].0,
            vec![0xaa; 32]
        );

        // the override replaces it
        CsmeNoUpdate.update(
            &Reference::new(),
            &["csme/no-update".to_string()],
            &mut subj,
        );
        assert_eq!(
            subj.baseline.csme_component_hash[&2].0,
            vec![0xbb; 32]
        );
    }

    #[test]
    fn version_bump_carries_new_hash() {
        let mut bline = baseline::Values::new();
        bline
            .csme_component_version
            .insert(2, vec![1, 0, 0, 0]);
        bline
            .csme_component_hash
            .insert(2, Buffer(vec![0xaa; 32]));
        let mut subj = subject(Values::new(), bline);
        subj.boot
            .csme_component_versions
            .insert(2, manifest([1, 0, 0, 1]));
        subj.boot.csme_component_hash.insert(2, vec![0xbb; 32]);

        assert!(CsmeNoUpdate.verify(&Reference::new(), &subj).is_none());
        CsmeNoUpdate.update(&Reference::new(), &[], &mut subj);
        assert_eq!(
            subj.baseline.csme_component_version[&2],
            vec![1, 0, 0, 1]
        );
        assert_eq!(
            subj.baseline.csme_component_hash[&2].0,
            vec![0xbb; 32]
        );
    }
}
