// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! ESET endpoint protection checks for Linux: the kernel module must be
//! loaded and enabled, the exclusion lists must match the reviewed
//! state and the product's binaries in the IMA log must carry known
//! measurements.

use log::info;

use super::{has_issue, Check};
use crate::digest::{before_after, DigestSet};
use crate::issues::{
    EsetExcludedSetArgs, EsetManipulatedArgs, FileChange, Issue,
};
use crate::reference::Reference;
use crate::subject::Subject;

/// Binaries whose absence from the IMA log means the product is not
/// running and file findings would be meaningless.
pub(crate) const CRITICAL_BINARIES: [&str; 5] = [
    "/opt/eset/RemoteAdministrator/Agent/ERAAgent",
    "/opt/eset/efs/sbin/startd",
    "/opt/eset/efs/lib/sysinfod",
    "/opt/eset/efs/lib/utild",
    "/opt/eset/efs/lib/oaeventd",
];
pub(crate) const CRITICAL_BINARIES_LEN: usize = CRITICAL_BINARIES.len();

fn is_word(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `<word>.so` optionally followed by a dotted numeric version,
/// e.g. `libeset.so.1.2`.
fn is_shared_object(name: &str) -> bool {
    let stem_len = match name.find(".so") {
        Some(i) => i,
        None => return false,
    };
    if !is_word(&name[..stem_len]) {
        return false;
    }
    let rest = &name[stem_len + 3..];
    if rest.is_empty() {
        return true;
    }
    rest.starts_with('.')
        && rest[1..].split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_digit())
        })
}

/// Whether `path` belongs to the ESET installation and its measurement
/// is worth tracking.
pub(crate) fn is_eset_binary(path: &str) -> bool {
    if path.starts_with("/opt/eset/efs/sbin/") {
        return true;
    }
    if let Some(name) = path.strip_prefix("/opt/eset/efs/lib/") {
        return is_word(name) || is_shared_object(name);
    }
    if let Some(name) =
        path.strip_prefix("/opt/eset/RemoteAdministrator/Agent/")
    {
        return name == "ERAAgent" || is_shared_object(name);
    }
    false
}

/// The on-access scanner kernel module, at any installation prefix.
pub(crate) fn is_eset_module(path: &str) -> bool {
    const SUFFIX: &str = "/eset/efs/eset_rtp.ko";
    path.starts_with('/')
        && path.ends_with(SUFFIX)
        && path.len() > SUFFIX.len()
}

pub(crate) fn critical_binary_index(path: &str) -> Option<usize> {
    CRITICAL_BINARIES.iter().position(|p| *p == path)
}

/// a & b and a - b, both sorted. `a` is expected sorted already.
fn intersection_and_difference(
    a: &[String],
    b: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut hit = vec![false; a.len()];
    let mut common = Vec::new();
    for bb in b {
        if let Ok(pos) = a.binary_search(bb) {
            if !hit[pos] {
                hit[pos] = true;
                common.push(bb.clone());
            }
        }
    }
    let mut diff: Vec<String> = a
        .iter()
        .zip(&hit)
        .filter(|(_, hit)| !**hit)
        .map(|(aa, _)| aa.clone())
        .collect();
    common.sort();
    diff.sort();
    (common, diff)
}

/// The sysfs exclusion list: entries separated by a newline and a NUL.
fn split_exclusions(data: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(data);
    let mut entries: Vec<String> =
        text.split("\n\u{0}").map(str::to_string).collect();
    entries.sort();
    entries
}

pub struct EsetModuleEnabled;

impl Check for EsetModuleEnabled {
    fn name(&self) -> &'static str {
        "Linux ESET kernel module"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let eset = subj.values.eset.as_ref()?;
        if !subj.baseline.allow_disabled_eset
            && eset.enabled.data.0 != b"1\n"
        {
            return Some(Issue::EsetDisabled);
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if subj.values.eset.is_none() {
            return;
        }
        if has_issue(overrides, "eset/disabled")
            && !subj.baseline.allow_disabled_eset
        {
            subj.baseline.allow_disabled_eset = true;
            subj.baseline_modified = true;
        }
    }
}

pub struct EsetExcluded;

impl Check for EsetExcluded {
    fn name(&self) -> &'static str {
        "Linux ESET excluded list"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let eset = subj.values.eset.as_ref()?;

        let mut files = Vec::new();
        if !subj.baseline.eset_excluded_files.is_empty() {
            let excl = split_exclusions(&eset.excluded_files.data.0);
            let (same, diff) = intersection_and_difference(
                &excl,
                &subj.baseline.eset_excluded_files,
            );
            if excl != same {
                files = diff;
            }
        }

        let mut processes = Vec::new();
        if !subj.baseline.eset_excluded_processes.is_empty() {
            let excl =
                split_exclusions(&eset.excluded_processes.data.0);
            let (same, diff) = intersection_and_difference(
                &excl,
                &subj.baseline.eset_excluded_processes,
            );
            if excl != same {
                processes = diff;
            }
        }

        if files.is_empty() && processes.is_empty() {
            return None;
        }
        Some(Issue::EsetExcludedSet {
            args: EsetExcludedSetArgs { files, processes },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let eset = match &subj.values.eset {
            Some(eset) => eset,
            None => return,
        };
        let allow_excluded = has_issue(overrides, "eset/excluded-set");

        let excl_files = split_exclusions(&eset.excluded_files.data.0);
        let (same, _) = intersection_and_difference(
            &excl_files,
            &subj.baseline.eset_excluded_files,
        );
        if allow_excluded
            || same == excl_files
            || subj.baseline.eset_excluded_files.is_empty()
        {
            subj.baseline.eset_excluded_files = excl_files;
            subj.baseline_modified = true;
        }

        let excl_procs =
            split_exclusions(&eset.excluded_processes.data.0);
        let (same, _) = intersection_and_difference(
            &excl_procs,
            &subj.baseline.eset_excluded_processes,
        );
        if allow_excluded
            || same == excl_procs
            || subj.baseline.eset_excluded_processes.is_empty()
        {
            subj.baseline.eset_excluded_processes = excl_procs;
            subj.baseline_modified = true;
        }
    }
}

pub struct EsetFilesManipulated;

impl Check for EsetFilesManipulated {
    fn name(&self) -> &'static str {
        "Linux ESET endpoint protection files"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.ima_log.is_empty() {
            return None;
        }

        let mut module_hit = false;
        let mut critical_hit = [false; CRITICAL_BINARIES_LEN];
        let mut components = Vec::new();

        for ev in &subj.ima_log {
            let ng = match &ev.ng {
                Some(ng) => ng,
                None => continue,
            };
            if is_eset_binary(&ng.path) {
                let found = match DigestSet::new(&ng.file_digest) {
                    Ok(found) => found,
                    Err(err) => {
                        info!("eset file digest: {}", err);
                        continue;
                    }
                };
                if let Some(pinned) =
                    subj.baseline.eset_files.get(&ng.path)
                {
                    if !found.intersects_with(pinned) {
                        let (before, after) =
                            before_after(pinned, &found);
                        components.push(FileChange {
                            path: ng.path.clone(),
                            before,
                            after,
                        });
                    }
                }
                if let Some(idx) = critical_binary_index(&ng.path) {
                    critical_hit[idx] = true;
                }
            } else if is_eset_module(&ng.path) {
                let found = match DigestSet::new(&ng.file_digest) {
                    Ok(found) => found,
                    Err(err) => {
                        info!("eset module digest: {}", err);
                        continue;
                    }
                };
                if !subj
                    .baseline
                    .eset_kernel_module
                    .intersects_with(&found)
                {
                    let (before, after) = before_after(
                        &subj.baseline.eset_kernel_module,
                        &found,
                    );
                    components.push(FileChange {
                        path: ng.path.clone(),
                        before,
                        after,
                    });
                }
                module_hit = true;
            }
        }

        // without the full product in the log there is no point in
        // judging individual files
        let mut missing = !module_hit;
        for (idx, hit) in critical_hit.iter().enumerate() {
            if !hit {
                info!("missing eset binary {}", CRITICAL_BINARIES[idx]);
                missing = true;
            }
        }
        if missing || components.is_empty() {
            return None;
        }
        Some(Issue::EsetManipulated {
            args: EsetManipulatedArgs { components },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if subj.ima_log.is_empty() {
            return;
        }
        let allow_change = has_issue(overrides, "eset/manipulated");
        let mut change = false;

        for ev in &subj.ima_log {
            let ng = match &ev.ng {
                Some(ng) => ng,
                None => continue,
            };
            if is_eset_binary(&ng.path) {
                let found = match DigestSet::new(&ng.file_digest) {
                    Ok(found) => found,
                    Err(err) => {
                        info!("eset file digest: {}", err);
                        continue;
                    }
                };
                let pinned = subj
                    .baseline
                    .eset_files
                    .entry(ng.path.clone())
                    .or_default();
                if allow_change {
                    change = change || *pinned != found;
                    *pinned = found;
                } else {
                    change = pinned.union_with(&found) || change;
                }
            } else if is_eset_module(&ng.path) {
                let found = match DigestSet::new(&ng.file_digest) {
                    Ok(found) => found,
                    Err(err) => {
                        info!("eset module digest: {}", err);
                        continue;
                    }
                };
                if allow_change {
                    change = change
                        || subj.baseline.eset_kernel_module != found;
                    subj.baseline.eset_kernel_module = found;
                } else {
                    change = subj
                        .baseline
                        .eset_kernel_module
                        .union_with(&found)
                        || change;
                }
            }
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{self, Buffer};
    use crate::eventlog::ima::{ImaEvent, ImaNgFields};
    use crate::policy;
    use crate::subject::{
        ErrorBuffer, EsetConfig, SubjectOptions, Values,
    };
    use openssl::hash::{hash, MessageDigest};

    fn sha256_set(data: &[u8]) -> DigestSet {
        let sum = hash(MessageDigest::sha256(), data).unwrap(); //#[allow_ci]
        DigestSet::new(&sum).unwrap() //#[allow_ci]
    }

    fn subject(values: Values, bline: baseline::Values) -> Subject {
        Subject::new(
            values,
            bline,
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap() //#[allow_ci]
    }

    fn eset_config(
        enabled: &[u8],
        files: &str,
        procs: &str,
    ) -> EsetConfig {
        EsetConfig {
            enabled: ErrorBuffer {
                data: Buffer(enabled.to_vec()),
                error: String::new(),
            },
            excluded_files: ErrorBuffer {
                data: Buffer(files.as_bytes().to_vec()),
                error: String::new(),
            },
            excluded_processes: ErrorBuffer {
                data: Buffer(procs.as_bytes().to_vec()),
                error: String::new(),
            },
        }
    }

    fn ng_event(path: &str, data: &[u8]) -> ImaEvent {
        let digest =
            hash(MessageDigest::sha256(), data).unwrap().to_vec(); //#[allow_ci]
        ImaEvent {
            sequence: 0,
            pcr: 10,
            digest: [0u8; 20],
            name: "ima-ng".to_string(),
            data: Vec::new(),
            ng: Some(ImaNgFields {
                algo: "sha256".to_string(),
                file_digest: digest,
                path: path.to_string(),
                signature: Vec::new(),
            }),
        }
    }

    fn full_product_log() -> Vec<ImaEvent> {
        let mut log: Vec<ImaEvent> = CRITICAL_BINARIES
            .iter()
            .map(|path| ng_event(path, path.as_bytes()))
            .collect();
        log.push(ng_event(
            "/lib/modules/5.15/eset/efs/eset_rtp.ko",
            b"module",
        ));
        log
    }

    #[test]
    fn path_predicates() {
        assert!(is_eset_binary("/opt/eset/efs/sbin/startd"));
        assert!(is_eset_binary("/opt/eset/efs/lib/utild"));
        assert!(is_eset_binary("/opt/eset/efs/lib/libeset.so.1.2"));
        assert!(is_eset_binary(
            "/opt/eset/RemoteAdministrator/Agent/ERAAgent"
        ));
        assert!(is_eset_binary(
            "/opt/eset/RemoteAdministrator/Agent/libagent.so"
        ));
        assert!(!is_eset_binary("/opt/eset/efs/lib/with.dots"));
        assert!(!is_eset_binary("/usr/bin/ls"));
        assert!(!is_eset_binary(
            "/opt/eset/RemoteAdministrator/Agent/notes.txt"
        ));

        assert!(is_eset_module(
            "/lib/modules/5.15/eset/efs/eset_rtp.ko"
        ));
        assert!(!is_eset_module("/eset/efs/eset_rtp.ko"));
        assert!(!is_eset_module("eset/efs/eset_rtp.ko"));
    }

    #[test]
    fn set_arithmetic() {
        let a = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ];
        let b = vec!["b".to_string(), "d".to_string()];
        let (common, diff) = intersection_and_difference(&a, &b);
        assert_eq!(common, vec!["b"]);
        assert_eq!(diff, vec!["a", "c"]);
    }

    #[test]
    fn disabled_module_is_reported() {
        let mut values = Values::new();
        values.eset = Some(eset_config(b"0\n", "", ""));
        let mut subj = subject(values, baseline::Values::new());

        let iss = EsetModuleEnabled
            .verify(&Reference::new(), &subj)
            .expect("disabled"); //#[allow_ci]
        assert_eq!(iss.id(), "eset/disabled");

        EsetModuleEnabled.update(
            &Reference::new(),
            &["eset/disabled".to_string()],
            &mut subj,
        );
        assert!(subj.baseline.allow_disabled_eset);
        assert!(EsetModuleEnabled
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn no_eset_evidence_is_silent() {
        let subj =
            subject(Values::new(), baseline::Values::new());
        assert!(EsetModuleEnabled
            .verify(&Reference::new(), &subj)
            .is_none());
        assert!(EsetExcluded
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn new_exclusion_is_reported_and_not_learned() {
        let mut values = Values::new();
        values.eset =
            Some(eset_config(b"1\n", "/tmp/a\n\u{0}/tmp/b", ""));
        let mut bline = baseline::Values::new();
        bline.eset_excluded_files = vec!["/tmp/a".to_string()];
        bline.eset_excluded_processes = vec!["".to_string()];
        let mut subj = subject(values, bline);

        match EsetExcluded.verify(&Reference::new(), &subj) {
            Some(Issue::EsetExcludedSet { args }) => {
                assert_eq!(args.files, vec!["/tmp/b"]);
                assert!(args.processes.is_empty());
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        // the unapproved list must not replace the reviewed one
        EsetExcluded.update(&Reference::new(), &[], &mut subj);
        assert_eq!(
            subj.baseline.eset_excluded_files,
            vec!["/tmp/a"]
        );

        EsetExcluded.update(
            &Reference::new(),
            &["eset/excluded-set".to_string()],
            &mut subj,
        );
        assert_eq!(
            subj.baseline.eset_excluded_files,
            vec!["/tmp/a", "/tmp/b"]
        );
        assert!(EsetExcluded
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn manipulated_binary_is_reported() {
        let mut bline = baseline::Values::new();
        for path in CRITICAL_BINARIES {
            bline
                .eset_files
                .insert(path.to_string(), sha256_set(path.as_bytes()));
        }
        bline.eset_kernel_module = sha256_set(b"module");
        bline
            .eset_files
            .insert("/opt/eset/efs/sbin/startd".to_string(), sha256_set(b"old startd"));

        let mut subj = subject(Values::new(), bline);
        subj.ima_log = full_product_log();

        match EsetFilesManipulated.verify(&Reference::new(), &subj) {
            Some(Issue::EsetManipulated { args }) => {
                assert_eq!(args.components.len(), 1);
                assert_eq!(
                    args.components[0].path,
                    "/opt/eset/efs/sbin/startd"
                );
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn missing_critical_binary_mutes_file_findings() {
        let mut bline = baseline::Values::new();
        bline.eset_files.insert(
            "/opt/eset/efs/sbin/startd".to_string(),
            sha256_set(b"old startd"),
        );
        bline.eset_kernel_module = sha256_set(b"module");

        let mut subj = subject(Values::new(), bline);
        // startd changed, but the agent binaries are not in the log at
        // all, so the product state is unknown rather than manipulated
        subj.ima_log = vec![
            ng_event("/opt/eset/efs/sbin/startd", b"startd"),
            ng_event(
                "/lib/modules/5.15/eset/efs/eset_rtp.ko",
                b"module",
            ),
        ];
        assert!(EsetFilesManipulated
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn first_use_learns_product_files() {
        let mut subj =
            subject(Values::new(), baseline::Values::new());
        subj.ima_log = full_product_log();
        assert!(EsetFilesManipulated
            .verify(&Reference::new(), &subj)
            .is_none());
        EsetFilesManipulated.update(&Reference::new(), &[], &mut subj);
        assert!(subj.baseline_modified);
        assert_eq!(
            subj.baseline.eset_files.len(),
            CRITICAL_BINARIES_LEN
        );
        assert!(!subj.baseline.eset_kernel_module.is_unset());
    }
}
