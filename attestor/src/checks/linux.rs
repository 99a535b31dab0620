// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! GRUB2 boot chain check: kernel and initrd images measured under a
//! stable path must not change without a matching command line change.

use super::{has_issue, Check};
use crate::digest::before_after;
use crate::issues::{GrubBootChangedArgs, GrubConfig, Issue};
use crate::reference::Reference;
use crate::subject::Subject;

pub struct Grub;

impl Check for Grub {
    fn name(&self) -> &'static str {
        "GRUB2"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let kernel_changed = !subj
            .baseline
            .linux_digest
            .intersects_with(&subj.boot.linux_digest);
        let initrd_changed = !subj
            .baseline
            .initrd_digest
            .intersects_with(&subj.boot.initrd_digest);
        let booted_cmdline =
            subj.boot.linux_command.clone().unwrap_or_default();
        let cmdline_changed = !subj.baseline.linux_command_line.is_empty()
            && subj.baseline.linux_command_line != booted_cmdline;

        // a new kernel under the same path with an unchanged command
        // line was not a configured boot entry change
        let kernel_swapped = kernel_changed
            && !cmdline_changed
            && !subj.baseline.linux_path.is_empty()
            && subj.baseline.linux_path == subj.boot.linux_file;
        let initrd_swapped = initrd_changed
            && !subj.baseline.initrd_path.is_empty()
            && subj.baseline.initrd_path == subj.boot.initrd_file;
        if !kernel_swapped && !initrd_swapped {
            return None;
        }

        let (kernel_before, kernel_after) = before_after(
            &subj.baseline.linux_digest,
            &subj.boot.linux_digest,
        );
        let (initrd_before, initrd_after) = before_after(
            &subj.baseline.initrd_digest,
            &subj.boot.initrd_digest,
        );
        Some(Issue::GrubBootChanged {
            args: GrubBootChangedArgs {
                before: GrubConfig {
                    kernel: kernel_before,
                    kernel_path: subj.baseline.linux_path.clone(),
                    initrd: initrd_before,
                    initrd_path: subj.baseline.initrd_path.clone(),
                    command_line: subj
                        .baseline
                        .linux_command_line
                        .clone(),
                },
                after: GrubConfig {
                    kernel: kernel_after,
                    kernel_path: subj.boot.linux_file.clone(),
                    initrd: initrd_after,
                    initrd_path: subj.boot.initrd_file.clone(),
                    command_line: booted_cmdline,
                },
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        let allow_change = has_issue(overrides, "grub/boot-changed");
        let mut change = false;

        if allow_change {
            change = change
                || subj.baseline.linux_digest != subj.boot.linux_digest;
            subj.baseline.linux_digest = subj.boot.linux_digest.clone();
            change = change
                || subj.baseline.initrd_digest != subj.boot.initrd_digest;
            subj.baseline.initrd_digest =
                subj.boot.initrd_digest.clone();
        } else {
            change = subj
                .baseline
                .linux_digest
                .union_with(&subj.boot.linux_digest)
                || change;
            change = subj
                .baseline
                .initrd_digest
                .union_with(&subj.boot.initrd_digest)
                || change;
        }

        if subj.baseline.linux_command_line.is_empty() || allow_change {
            let booted =
                subj.boot.linux_command.clone().unwrap_or_default();
            change =
                change || subj.baseline.linux_command_line != booted;
            subj.baseline.linux_command_line = booted;
        }
        if subj.baseline.linux_path.is_empty()
            || (allow_change && !subj.boot.linux_file.is_empty())
        {
            change =
                change || subj.baseline.linux_path != subj.boot.linux_file;
            subj.baseline.linux_path = subj.boot.linux_file.clone();
        }
        if subj.baseline.initrd_path.is_empty()
            || (allow_change && !subj.boot.initrd_file.is_empty())
        {
            change = change
                || subj.baseline.initrd_path != subj.boot.initrd_file;
            subj.baseline.initrd_path = subj.boot.initrd_file.clone();
        }

        subj.baseline_modified = subj.baseline_modified || change;
    }
}
