// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Named workarounds for known firmware logging bugs.
//!
//! Some firmware measures the Exit Boot Services action strings into PCR 5
//! without recording them in the event log. Each workaround synthesizes the
//! missing events so the replay can be retried; they are only applied when a
//! straight replay fails on the affected PCR, and never silently.

use super::{Digest, EventLog, EventLogError, EventType, RawEvent};

pub const EBS_INVOCATION: &str = "Exit Boot Services Invocation";
pub const EBS_SUCCESS: &str = "Exit Boot Services Returned with Success";
pub const EBS_FAILURE: &str = "Exit Boot Services Returned with Failure";

pub(crate) struct Workaround {
    pub(crate) id: &'static str,
    pub(crate) affected_pcr: u32,
    pub(crate) apply: fn(&mut EventLog) -> Result<(), EventLogError>,
}

pub(crate) const WORKAROUNDS: &[Workaround] = &[
    Workaround {
        id: "EBS Invocation + Success",
        affected_pcr: 5,
        apply: |log| {
            inject(log, 5, EBS_INVOCATION)?;
            inject(log, 5, EBS_SUCCESS)
        },
    },
    Workaround {
        id: "EBS Invocation + Failure",
        affected_pcr: 5,
        apply: |log| {
            inject(log, 5, EBS_INVOCATION)?;
            inject(log, 5, EBS_FAILURE)
        },
    },
    Workaround {
        id: "EBS Invocation + Failure + Success",
        affected_pcr: 5,
        apply: |log| {
            inject(log, 5, EBS_INVOCATION)?;
            inject(log, 5, EBS_FAILURE)?;
            inject(log, 5, EBS_SUCCESS)
        },
    },
];

/// Appends a synthetic EV_EFI_ACTION event to the log, digesting `data`
/// under every algorithm bank the log carries.
pub(crate) fn inject(
    log: &mut EventLog,
    pcr: u32,
    data: &str,
) -> Result<(), EventLogError> {
    let sequence = log
        .raw_events
        .last()
        .map(|e| e.sequence + 1)
        .unwrap_or_default();
    let mut digests = Vec::with_capacity(log.algs.len());
    for alg in &log.algs {
        digests.push(Digest {
            alg: *alg,
            data: alg.hash(data.as_bytes())?,
        });
    }
    log.raw_events.push(RawEvent {
        sequence,
        index: pcr,
        typ: EventType::EfiAction,
        data: data.as_bytes().to_vec(),
        digests,
    });
    Ok(())
}
