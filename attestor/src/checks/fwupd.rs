// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Pending firmware updates reported through fwupd. Advisory only;
//! outdated firmware is surfaced but never an incident.

use super::{has_issue, Check};
use crate::issues::{FirmwareUpdateArgs, FirmwareUpdateEntry, Issue};
use crate::reference::Reference;
use crate::subject::Subject;

pub const FWUPD_RELEASE_FLAG_TRUSTED_PAYLOAD: u64 = 1 << 0;
pub const FWUPD_RELEASE_FLAG_TRUSTED_METADATA: u64 = 1 << 1;
pub const FWUPD_RELEASE_FLAG_IS_UPGRADE: u64 = 1 << 2;
pub const FWUPD_RELEASE_FLAG_IS_DOWNGRADE: u64 = 1 << 3;

pub struct FirmwareUpdateCheck;

impl Check for FirmwareUpdateCheck {
    fn name(&self) -> &'static str {
        "LVFS update check"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.baseline.allow_outdated_firmware
            || subj.fwupd_devices.is_empty()
        {
            return None;
        }

        let mut device_ids: Vec<&String> =
            subj.fwupd_devices.keys().collect();
        device_ids.sort();

        let mut updates = Vec::new();
        for id in device_ids {
            let device = &subj.fwupd_devices[id];
            // releases are sorted newest first by the collector
            let newest = match device.releases.first() {
                Some(release) => release,
                None => continue,
            };
            if newest.trust_flags & FWUPD_RELEASE_FLAG_IS_UPGRADE == 0 {
                continue;
            }
            updates.push(FirmwareUpdateEntry {
                name: device.name.clone(),
                current: device.version.clone(),
                next: newest.version.clone(),
            });
        }

        if updates.is_empty() {
            return None;
        }
        Some(Issue::FirmwareUpdate {
            args: FirmwareUpdateArgs { updates },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if has_issue(overrides, "fw/update")
            && !subj.baseline.allow_outdated_firmware
        {
            subj.baseline.allow_outdated_firmware = true;
            subj.baseline_modified = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline;
    use crate::policy;
    use crate::subject::{
        FwupdDevice, FwupdReleaseEntry, SubjectOptions, Values,
    };

    fn subject_with_device(trust_flags: u64) -> Subject {
        let mut subj = Subject::new(
            Values::new(),
            baseline::Values::new(),
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap(); //#[allow_ci]
        subj.fwupd_devices.insert(
            "abc".to_string(),
            FwupdDevice {
                name: "System Firmware".to_string(),
                version: "1.0.1".to_string(),
                version_format: 2,
                releases: vec![FwupdReleaseEntry {
                    version: "1.0.2".to_string(),
                    trust_flags,
                }],
            },
        );
        subj
    }

    #[test]
    fn pending_upgrade_is_advisory() {
        let subj =
            subject_with_device(FWUPD_RELEASE_FLAG_IS_UPGRADE);
        let iss = FirmwareUpdateCheck
            .verify(&Reference::new(), &subj)
            .expect("update"); //#[allow_ci]
        assert!(!iss.incident());
        match iss {
            Issue::FirmwareUpdate { args } => {
                assert_eq!(args.updates.len(), 1);
                assert_eq!(args.updates[0].current, "1.0.1");
                assert_eq!(args.updates[0].next, "1.0.2");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn downgrade_releases_are_ignored() {
        let subj =
            subject_with_device(FWUPD_RELEASE_FLAG_IS_DOWNGRADE);
        assert!(FirmwareUpdateCheck
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn override_silences_the_device() {
        let mut subj =
            subject_with_device(FWUPD_RELEASE_FLAG_IS_UPGRADE);
        FirmwareUpdateCheck.update(
            &Reference::new(),
            &["fw/update".to_string()],
            &mut subj,
        );
        assert!(subj.baseline.allow_outdated_firmware);
        assert!(subj.baseline_modified);
        assert!(FirmwareUpdateCheck
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn no_devices_is_silent() {
        let subj = Subject::new(
            Values::new(),
            baseline::Values::new(),
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap(); //#[allow_ci]
        assert!(FirmwareUpdateCheck
            .verify(&Reference::new(), &subj)
            .is_none());
    }
}
