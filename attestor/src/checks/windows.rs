// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Windows measured boot checks: the kernel configuration recorded in
//! the SIPA events, the trust-point quotes chaining resume logs to the
//! cold boot, and the monotonic boot counter.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use log::{info, warn};
use openssl::hash::{Hasher, MessageDigest};
use openssl::pkey::PKey;
use openssl::sign::Verifier;

use super::{has_issue, Check};
use crate::eventlog::windows::Ternary;
use crate::eventlog::HashAlg;
use crate::issues::{
    Issue, WindowsBootConfigArgs, WindowsBootCounterReplayArgs,
    WindowsBootLogQuotesArgs, ERR_MISSING_TRUST_POINT,
    ERR_WRONG_FORMAT, ERR_WRONG_QUOTE, ERR_WRONG_SIGNATURE,
};
use crate::reference::Reference;
use crate::subject::Subject;

pub struct WindowsKernelConfig;

impl Check for WindowsKernelConfig {
    fn name(&self) -> &'static str {
        "WBCL kernel configuration"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.baseline.allow_unsecure_windows_boot {
            return None;
        }
        for winlog in &subj.windows_logs {
            let boot_debugging = winlog.boot_debugging_enabled;
            let kernel_debugging = winlog.kernel_debug_enabled;
            let dep_disabled = winlog.dep_enabled == Ternary::False;
            let code_integrity_disabled =
                winlog.code_integrity_enabled == Ternary::False;
            let test_signing = winlog.test_signing_enabled;

            if boot_debugging
                || kernel_debugging
                || dep_disabled
                || code_integrity_disabled
                || test_signing
            {
                return Some(Issue::WindowsBootConfig {
                    args: WindowsBootConfigArgs {
                        boot_debugging,
                        kernel_debugging,
                        dep_disabled,
                        code_integrity_disabled,
                        test_signing,
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
        if has_issue(overrides, "windows/boot-config")
            && !subj.baseline.allow_unsecure_windows_boot
        {
            subj.baseline.allow_unsecure_windows_boot = true;
            subj.baseline_modified = true;
        }
    }
}

const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
const TPM_ST_ATTEST_QUOTE: u16 = 0x8018;

/// The parts of a TPMS_ATTEST quote structure the quote check needs.
struct QuoteInfo {
    /// Algorithm id and selected PCR indices, in wire order.
    selections: Vec<(u16, Vec<u32>)>,
    pcr_digest: Vec<u8>,
}

fn read_sized<R: Read>(cur: &mut R) -> Option<Vec<u8>> {
    let len = cur.read_u16::<BigEndian>().ok()?;
    let mut buf = vec![0u8; len as usize];
    cur.read_exact(&mut buf).ok()?;
    Some(buf)
}

/// Parses a marshaled TPMS_ATTEST of type TPM_ST_ATTEST_QUOTE.
fn parse_quote(blob: &[u8]) -> Option<QuoteInfo> {
    let mut cur = Cursor::new(blob);
    if cur.read_u32::<BigEndian>().ok()? != TPM_GENERATED_VALUE {
        return None;
    }
    if cur.read_u16::<BigEndian>().ok()? != TPM_ST_ATTEST_QUOTE {
        return None;
    }
    read_sized(&mut cur)?; // qualifiedSigner
    read_sized(&mut cur)?; // extraData

    // clockInfo and firmwareVersion
    let mut skip = [0u8; 17 + 8];
    cur.read_exact(&mut skip).ok()?;

    let count = cur.read_u32::<BigEndian>().ok()?;
    let mut selections = Vec::new();
    for _ in 0..count {
        let alg = cur.read_u16::<BigEndian>().ok()?;
        let size_of_select = cur.read_u8().ok()?;
        let mut bitmap = vec![0u8; size_of_select as usize];
        cur.read_exact(&mut bitmap).ok()?;
        let mut indices = Vec::new();
        for (byte_idx, byte) in bitmap.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    indices.push((byte_idx * 8 + bit) as u32);
                }
            }
        }
        selections.push((alg, indices));
    }
    let pcr_digest = read_sized(&mut cur)?;
    Some(QuoteInfo {
        selections,
        pcr_digest,
    })
}

/// RSASSA-PKCS1-v1_5 with SHA-1 over the raw attestation blob, the
/// scheme PCP quote keys use.
fn quote_signature_ok(
    blob: &[u8],
    signature: &[u8],
    key: &PKey<openssl::pkey::Public>,
) -> bool {
    let ok = Verifier::new(MessageDigest::sha1(), key)
        .and_then(|mut verifier| {
            verifier.update(blob)?;
            verifier.verify(signature)
        });
    ok.unwrap_or(false)
}

pub struct WindowsBootLogQuotes;

impl WindowsBootLogQuotes {
    fn quote_issue(error: &str, log: usize) -> Option<Issue> {
        Some(Issue::WindowsBootLogQuotes {
            args: WindowsBootLogQuotesArgs {
                error: error.to_string(),
                log: log as i64,
            },
        })
    }
}

impl Check for WindowsBootLogQuotes {
    fn name(&self) -> &'static str {
        "WBCL quote chain"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.event_logs.is_empty() || subj.windows_logs.is_empty() {
            return None;
        }
        if subj.values.pcp_quote_keys.is_empty() {
            return None;
        }
        // a single log without a trust-point quote is covered by the
        // regular event log replay
        if subj.event_logs.len() == 1
            && subj.windows_logs[0].trust_point_quote.is_empty()
        {
            return None;
        }
        if subj.baseline.allow_invalid_eventlog {
            return None;
        }

        for winlog in &subj.windows_logs {
            if winlog.trust_point_quote.is_empty() {
                return Self::quote_issue(ERR_MISSING_TRUST_POINT, 0);
            }
        }
        // every resume log needs its own quote to chain it to the boot
        if subj.event_logs.len() != subj.windows_logs.len() {
            return Self::quote_issue(ERR_MISSING_TRUST_POINT, 0);
        }

        for (log_idx, winlog) in subj.windows_logs.iter().enumerate() {
            let mut keys: Vec<&String> =
                winlog.trust_point_quote.keys().collect();
            keys.sort();

            for key in keys {
                let entry = &winlog.trust_point_quote[key];
                let quote = match parse_quote(&entry.quote) {
                    Some(quote) => quote,
                    None => {
                        warn!("undecodable quote in log {}", log_idx);
                        return Self::quote_issue(
                            ERR_WRONG_FORMAT,
                            log_idx,
                        );
                    }
                };

                let spki = match subj.values.pcp_quote_keys.get(key) {
                    Some(spki) => spki,
                    None => {
                        warn!("quote by unknown key {}", key);
                        return Self::quote_issue(
                            ERR_WRONG_FORMAT,
                            log_idx,
                        );
                    }
                };
                let pubkey = match PKey::public_key_from_der(&spki.0) {
                    Ok(pubkey) => pubkey,
                    Err(err) => {
                        warn!("quote key {}: {}", key, err);
                        return Self::quote_issue(
                            ERR_WRONG_FORMAT,
                            log_idx,
                        );
                    }
                };
                if !quote_signature_ok(
                    &entry.quote,
                    &entry.quote_signature,
                    &pubkey,
                ) {
                    return Self::quote_issue(
                        ERR_WRONG_SIGNATURE,
                        log_idx,
                    );
                }

                // replay the log the quote belongs to over the selected
                // PCRs and compare against the quoted composite digest
                let mut hasher =
                    Hasher::new(MessageDigest::sha1()).ok()?;
                for (alg_id, indices) in &quote.selections {
                    let alg = match HashAlg::from_tpm_alg(*alg_id) {
                        Some(alg) => alg,
                        None => {
                            info!(
                                "quote selects unknown bank {:#x}",
                                alg_id
                            );
                            continue;
                        }
                    };
                    let replayed = subj.event_logs[log_idx]
                        .compute_pcrs(alg, indices)
                        .ok()?;
                    for value in replayed {
                        hasher.update(&value).ok()?;
                    }
                }
                let composite = hasher.finish().ok()?;
                if composite.as_ref() != quote.pcr_digest.as_slice() {
                    return Self::quote_issue(
                        ERR_WRONG_QUOTE,
                        log_idx,
                    );
                }
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
        if has_issue(overrides, "windows/boot-log")
            && !subj.baseline.allow_invalid_eventlog
        {
            subj.baseline.allow_invalid_eventlog = true;
            subj.baseline_modified = true;
        }
    }
}

pub struct WindowsBootCounter;

impl Check for WindowsBootCounter {
    fn name(&self) -> &'static str {
        "Windows boot counter"
    }

    fn verify(
        &self,
        _reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.baseline.boot_count.is_empty() {
            return None;
        }
        let old_count =
            match u64::from_str_radix(&subj.baseline.boot_count, 16) {
                Ok(old_count) => old_count,
                Err(_) => return None,
            };

        for winlog in &subj.windows_logs {
            if winlog.boot_count < old_count {
                return Some(Issue::WindowsBootCounterReplay {
                    args: WindowsBootCounterReplayArgs {
                        latest: old_count.to_string(),
                        received: winlog.boot_count.to_string(),
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
        let old_count = if subj.baseline.boot_count.is_empty() {
            0
        } else {
            match u64::from_str_radix(&subj.baseline.boot_count, 16) {
                Ok(old_count) => old_count,
                Err(_) => return,
            }
        };

        let mut max_boot = 0;
        let mut update = false;
        for winlog in &subj.windows_logs {
            if winlog.boot_count > old_count {
                max_boot = winlog.boot_count;
                update = true;
            } else {
                update = false;
            }
        }
        if !update {
            update = has_issue(overrides, "windows/boot-counter-replay");
            max_boot = subj
                .windows_logs
                .iter()
                .map(|w| w.boot_count)
                .max()
                .unwrap_or(0);
        }

        // counters start at one; zero means the log carried none
        if update && max_boot > 0 {
            subj.baseline.boot_count = format!("{:x}", max_boot);
            subj.baseline_modified = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{self, Buffer};
    use crate::eventlog::marshal::marshal;
    use crate::eventlog::windows::{WinEvents, WinWbclQuote};
    use crate::eventlog::{Event, EventLog, EventType};
    use crate::policy;
    use crate::subject::{SubjectOptions, Values};
    use byteorder::WriteBytesExt;
    use openssl::pkey::Private;
    use openssl::rsa::Rsa;
    use openssl::sign::Signer;

    fn subject() -> Subject {
        Subject::new(
            Values::new(),
            baseline::Values::new(),
            policy::Values::new(),
            SubjectOptions::default(),
        )
        .unwrap() //#[allow_ci]
    }

    fn winlog(f: impl FnOnce(&mut WinEvents)) -> WinEvents {
        let mut log = WinEvents::default();
        f(&mut log);
        log
    }

    #[test]
    fn debug_flags_are_reported() {
        let mut subj = subject();
        subj.windows_logs = vec![winlog(|w| {
            w.kernel_debug_enabled = true;
            w.dep_enabled = Ternary::True;
        })];

        let iss = WindowsKernelConfig
            .verify(&Reference::new(), &subj)
            .expect("config"); //#[allow_ci]
        assert!(!iss.incident());
        match iss {
            Issue::WindowsBootConfig { args } => {
                assert!(args.kernel_debugging);
                assert!(!args.boot_debugging);
                assert!(!args.dep_disabled);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        WindowsKernelConfig.update(
            &Reference::new(),
            &["windows/boot-config".to_string()],
            &mut subj,
        );
        assert!(subj.baseline.allow_unsecure_windows_boot);
        assert!(WindowsKernelConfig
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn unknown_ternary_flags_are_not_failures() {
        let mut subj = subject();
        subj.windows_logs = vec![WinEvents::default()];
        assert!(WindowsKernelConfig
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn counter_regression_is_reported() {
        let mut subj = subject();
        subj.baseline.boot_count = "a".to_string();
        subj.windows_logs = vec![winlog(|w| w.boot_count = 9)];

        match WindowsBootCounter.verify(&Reference::new(), &subj) {
            Some(Issue::WindowsBootCounterReplay { args }) => {
                assert_eq!(args.latest, "10");
                assert_eq!(args.received, "9");
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }

        // without the override the stale counter is not persisted
        WindowsBootCounter.update(&Reference::new(), &[], &mut subj);
        assert_eq!(subj.baseline.boot_count, "a");

        WindowsBootCounter.update(
            &Reference::new(),
            &["windows/boot-counter-replay".to_string()],
            &mut subj,
        );
        assert_eq!(subj.baseline.boot_count, "9");
    }

    #[test]
    fn counter_advances_monotonically() {
        let mut subj = subject();
        subj.baseline.boot_count = "a".to_string();
        subj.windows_logs = vec![winlog(|w| w.boot_count = 11)];
        assert!(WindowsBootCounter
            .verify(&Reference::new(), &subj)
            .is_none());
        WindowsBootCounter.update(&Reference::new(), &[], &mut subj);
        assert_eq!(subj.baseline.boot_count, "b");
    }

    #[test]
    fn zero_counter_is_never_persisted() {
        let mut subj = subject();
        subj.windows_logs = vec![WinEvents::default()];
        WindowsBootCounter.update(
            &Reference::new(),
            &["windows/boot-counter-replay".to_string()],
            &mut subj,
        );
        assert!(subj.baseline.boot_count.is_empty());
    }

    fn sha256(data: &[u8]) -> Vec<u8> {
        HashAlg::Sha256.hash(data).unwrap() //#[allow_ci]
    }

    fn test_log() -> EventLog {
        let events: Vec<Event> = (0..2)
            .map(|i| Event {
                sequence: 0,
                index: i,
                typ: EventType::Separator,
                data: vec![0, 0, 0, 0],
                digest: sha256(&[0, 0, 0, 0]),
                alg: HashAlg::Sha256,
            })
            .collect();
        let raw = marshal(HashAlg::Sha256, &events).unwrap(); //#[allow_ci]
        EventLog::parse(&raw).unwrap() //#[allow_ci]
    }

    /// Marshals a TPMS_ATTEST quote over SHA-256 PCRs 0 and 1 with the
    /// given composite digest.
    fn attest_blob(pcr_digest: &[u8]) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.write_u32::<BigEndian>(TPM_GENERATED_VALUE).unwrap(); //#[allow_ci]
        blob.write_u16::<BigEndian>(TPM_ST_ATTEST_QUOTE).unwrap(); //#[allow_ci]
        blob.write_u16::<BigEndian>(0).unwrap(); // qualifiedSigner //#[allow_ci]
        blob.write_u16::<BigEndian>(0).unwrap(); // extraData //#[allow_ci]
        blob.extend_from_slice(&[0u8; 17 + 8]); // clock, firmware
        blob.write_u32::<BigEndian>(1).unwrap(); // one selection //#[allow_ci]
        blob.write_u16::<BigEndian>(HashAlg::Sha256.tpm_alg())
            .unwrap(); //#[allow_ci]
        blob.write_u8(3).unwrap(); //#[allow_ci]
        blob.extend_from_slice(&[0b11, 0, 0]); // PCRs 0 and 1
        blob.write_u16::<BigEndian>(pcr_digest.len() as u16)
            .unwrap(); //#[allow_ci]
        blob.extend_from_slice(pcr_digest);
        blob
    }

    fn quoted_subject(
        rsa: &Rsa<Private>,
        pcr_digest: &[u8],
    ) -> Subject {
        let key = PKey::from_rsa(rsa.clone()).unwrap(); //#[allow_ci]
        let blob = attest_blob(pcr_digest);
        let mut signer =
            Signer::new(MessageDigest::sha1(), &key).unwrap(); //#[allow_ci]
        signer.update(&blob).unwrap(); //#[allow_ci]
        let signature = signer.sign_to_vec().unwrap(); //#[allow_ci]

        let mut subj = subject();
        subj.event_logs = vec![test_log()];
        let mut winlog = WinEvents::default();
        winlog.trust_point_quote.insert(
            "aik".to_string(),
            WinWbclQuote {
                aik_pub_digest: Vec::new(),
                quote: blob,
                quote_signature: signature,
            },
        );
        subj.windows_logs = vec![winlog];
        subj.values.pcp_quote_keys.insert(
            "aik".to_string(),
            Buffer(key.public_key_to_der().unwrap()), //#[allow_ci]
        );
        subj
    }

    fn composite_digest(log: &EventLog) -> Vec<u8> {
        let replayed = log
            .compute_pcrs(HashAlg::Sha256, &[0, 1])
            .unwrap(); //#[allow_ci]
        let mut hasher =
            Hasher::new(MessageDigest::sha1()).unwrap(); //#[allow_ci]
        for value in replayed {
            hasher.update(&value).unwrap(); //#[allow_ci]
        }
        hasher.finish().unwrap().to_vec() //#[allow_ci]
    }

    #[test]
    fn valid_quote_chain_passes() {
        let rsa = Rsa::generate(2048).unwrap(); //#[allow_ci]
        let digest = composite_digest(&test_log());
        let subj = quoted_subject(&rsa, &digest);
        assert!(WindowsBootLogQuotes
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn tampered_quote_digest_is_reported() {
        let rsa = Rsa::generate(2048).unwrap(); //#[allow_ci]
        let subj = quoted_subject(&rsa, &[7u8; 20]);
        match WindowsBootLogQuotes.verify(&Reference::new(), &subj) {
            Some(Issue::WindowsBootLogQuotes { args }) => {
                assert_eq!(args.error, ERR_WRONG_QUOTE);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn bad_signature_is_reported() {
        let rsa = Rsa::generate(2048).unwrap(); //#[allow_ci]
        let digest = composite_digest(&test_log());
        let mut subj = quoted_subject(&rsa, &digest);
        let entry = subj
            .windows_logs[0]
            .trust_point_quote
            .get_mut("aik")
            .unwrap(); //#[allow_ci]
        entry.quote_signature[0] ^= 0xFF;

        match WindowsBootLogQuotes.verify(&Reference::new(), &subj) {
            Some(Issue::WindowsBootLogQuotes { args }) => {
                assert_eq!(args.error, ERR_WRONG_SIGNATURE);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn resume_log_without_quote_breaks_the_chain() {
        let mut subj = subject();
        subj.event_logs = vec![test_log(), test_log()];
        subj.windows_logs =
            vec![WinEvents::default(), WinEvents::default()];
        subj.values
            .pcp_quote_keys
            .insert("aik".to_string(), Buffer(vec![1, 2, 3]));

        match WindowsBootLogQuotes.verify(&Reference::new(), &subj) {
            Some(Issue::WindowsBootLogQuotes { args }) => {
                assert_eq!(args.error, ERR_MISSING_TRUST_POINT);
            }
            other => panic!("wrong issue {:?}", other), //#[allow_ci]
        }
    }

    #[test]
    fn single_log_without_quote_is_fine() {
        let mut subj = subject();
        subj.event_logs = vec![test_log()];
        subj.windows_logs = vec![WinEvents::default()];
        subj.values
            .pcp_quote_keys
            .insert("aik".to_string(), Buffer(vec![1, 2, 3]));
        assert!(WindowsBootLogQuotes
            .verify(&Reference::new(), &subj)
            .is_none());
    }

    #[test]
    fn override_mutes_quote_findings() {
        let rsa = Rsa::generate(2048).unwrap(); //#[allow_ci]
        let mut subj = quoted_subject(&rsa, &[7u8; 20]);
        WindowsBootLogQuotes.update(
            &Reference::new(),
            &["windows/boot-log".to_string()],
            &mut subj,
        );
        assert!(subj.baseline.allow_invalid_eventlog);
        assert!(WindowsBootLogQuotes
            .verify(&Reference::new(), &subj)
            .is_none());
    }
}
