// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! TPM trust anchor checks: event log replay against the quoted PCR
//! banks, detection of software TPMs and validation of the endorsement
//! key certificate against the vendor CA pool and the TCG EK credential
//! profile.

use log::{info, warn};
use openssl::x509::X509;

use super::{has_issue, name_string, Check};
use crate::eventlog::{
    pcrs_from_hex_map, EventLog, EventLogError, HashAlg,
};
use crate::issues::{
    Issue, TpmEndorsementCertUnverifiedArgs, TpmInvalidEventlogArgs,
    TpmInvalidEventlogPcr, ERR_FORMAT_INVALID, ERR_INVALID_CERTIFICATE,
    ERR_NO_EKU, ERR_PCR_MISMATCH, ERR_SAN_INVALID, ERR_SAN_MISMATCH,
};
use crate::reference::Reference;
use crate::subject::Subject;

/// Whether the device attests with a registered software TPM, matched by
/// the endorsement public key. An absent certificate counts as a real
/// TPM so that nothing downstream is muted by accident.
pub(crate) fn subject_has_dummy_tpm(
    reference: &Reference,
    subj: &Subject,
) -> bool {
    let der = match &subj.baseline.endorsement_certificate {
        Some(der) => der,
        None => return false,
    };
    let cert = match X509::from_der(&der.0) {
        Ok(cert) => cert,
        Err(_) => return false,
    };
    let spki = match cert
        .public_key()
        .and_then(|key| key.public_key_to_der())
    {
        Ok(spki) => spki,
        Err(_) => return false,
    };
    reference.is_software_tpm_key(&spki).unwrap_or(false)
}

pub struct TpmEventLog;

/// Replays one quoted PCR bank against the log. Mismatching PCRs come
/// back as issue arguments; structural verification errors mean the
/// bank cannot be judged and yield nothing.
fn verify_bank(
    bank: &std::collections::HashMap<String, String>,
    log: &EventLog,
    alg: HashAlg,
) -> Result<Vec<TpmInvalidEventlogPcr>, Issue> {
    let pcrs = pcrs_from_hex_map(bank, alg).map_err(|_| {
        Issue::TpmInvalidEventlog {
            args: TpmInvalidEventlogArgs {
                error: ERR_FORMAT_INVALID.to_string(),
                pcr: Vec::new(),
            },
        }
    })?;

    match log.verify(&pcrs) {
        Ok(_) => Ok(Vec::new()),
        Err(EventLogError::Replay(err)) => {
            info!("event log replay failed for {}", alg);
            let mut failures: Vec<TpmInvalidEventlogPcr> = err
                .invalid
                .iter()
                .map(|m| TpmInvalidEventlogPcr {
                    number: m.index.to_string(),
                    computed: hex::encode(&m.computed),
                    quoted: hex::encode(&m.quoted),
                })
                .collect();
            failures.sort_by_key(|f| {
                f.number.parse::<u32>().unwrap_or(u32::MAX)
            });
            Ok(failures)
        }
        Err(err) => {
            info!("cannot verify {} bank: {}", alg, err);
            Ok(Vec::new())
        }
    }
}

impl Check for TpmEventLog {
    fn name(&self) -> &'static str {
        "TPM event log"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subject_has_dummy_tpm(reference, subj) {
            return None;
        }

        if subj.boot.is_empty || subj.event_logs.is_empty() {
            if !subj.baseline.allow_no_eventlog {
                return Some(Issue::TpmNoEventlog);
            }
            return None;
        }

        let log = &subj.event_logs[subj.current_event_log_idx];

        let mut failures = Vec::new();
        let mut banks: Vec<&String> = subj.values.pcr.keys().collect();
        banks.sort();
        for algo in banks {
            let alg = match algo.as_str() {
                "4" => HashAlg::Sha1,
                "11" => HashAlg::Sha256,
                _ => continue,
            };
            match verify_bank(&subj.values.pcr[algo], log, alg) {
                Ok(new_failures) => failures.extend(new_failures),
                Err(iss) => return Some(iss),
            }
        }

        // PCRs 10 and 11 are judged by the IMA runtime log replay when
        // one was submitted
        if !subj.ima_log.is_empty() {
            failures
                .retain(|f| f.number != "10" && f.number != "11");
        }

        if failures.is_empty() || subj.baseline.allow_invalid_eventlog
        {
            return None;
        }
        Some(Issue::TpmInvalidEventlog {
            args: TpmInvalidEventlogArgs {
                error: ERR_PCR_MISMATCH.to_string(),
                pcr: failures,
            },
        })
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if has_issue(overrides, "tpm/no-eventlog")
            && !subj.baseline.allow_no_eventlog
        {
            subj.baseline.allow_no_eventlog = true;
            subj.baseline_modified = true;
        }
        if has_issue(overrides, "tpm/invalid-eventlog")
            && !subj.baseline.allow_invalid_eventlog
        {
            subj.baseline.allow_invalid_eventlog = true;
            subj.baseline_modified = true;
        }
    }
}

pub struct DummyTpm;

impl Check for DummyTpm {
    fn name(&self) -> &'static str {
        "Dummy TPM"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        if subj.baseline.endorsement_certificate.is_none() {
            return None;
        }
        if subject_has_dummy_tpm(reference, subj)
            && !subj.baseline.allow_dummy_tpm
        {
            return Some(Issue::TpmDummy);
        }
        None
    }

    fn update(
        &self,
        _reference: &Reference,
        overrides: &[String],
        subj: &mut Subject,
    ) {
        if has_issue(overrides, "tpm/dummy")
            && !subj.baseline.allow_dummy_tpm
        {
            subj.baseline.allow_dummy_tpm = true;
            subj.baseline_modified = true;
        }
    }
}

// DER tags and OID encodings the EK credential profile walk needs.
const TAG_SEQUENCE: u8 = 0x30;
const TAG_SET: u8 = 0x31;
const TAG_OID: u8 = 0x06;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_UTF8_STRING: u8 = 0x0C;
const TAG_PRINTABLE_STRING: u8 = 0x13;
const TAG_EXTENSIONS: u8 = 0xA3;
const TAG_DIRECTORY_NAME: u8 = 0xA4;

const OID_EXTENDED_KEY_USAGE: &[u8] = &[0x55, 0x1D, 0x25];
const OID_SUBJECT_ALT_NAME: &[u8] = &[0x55, 0x1D, 0x11];
// 2.23.133.8.1, tcg-kp-EKCertificate
const OID_TCG_KP_EK_CERTIFICATE: &[u8] =
    &[0x67, 0x81, 0x05, 0x08, 0x01];
// 2.23.133.2.1 through .3
const OID_TCG_TPM_MANUFACTURER: &[u8] =
    &[0x67, 0x81, 0x05, 0x02, 0x01];
const OID_TCG_TPM_MODEL: &[u8] = &[0x67, 0x81, 0x05, 0x02, 0x02];
const OID_TCG_TPM_VERSION: &[u8] = &[0x67, 0x81, 0x05, 0x02, 0x03];

/// Reads one TLV, returning tag, content and the remaining bytes.
fn der_read(buf: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    if buf.len() < 2 {
        return None;
    }
    let tag = buf[0];
    let first = buf[1];
    let mut idx = 2;
    let len = if first & 0x80 == 0 {
        first as usize
    } else {
        let count = (first & 0x7F) as usize;
        if count == 0 || count > 4 || buf.len() < idx + count {
            return None;
        }
        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | buf[idx] as usize;
            idx += 1;
        }
        len
    };
    if buf.len() < idx + len {
        return None;
    }
    Some((tag, &buf[idx..idx + len], &buf[idx + len..]))
}

fn der_children(mut content: &[u8]) -> Option<Vec<(u8, &[u8])>> {
    let mut out = Vec::new();
    while !content.is_empty() {
        let (tag, value, rest) = der_read(content)?;
        out.push((tag, value));
        content = rest;
    }
    Some(out)
}

/// The DER content of a TBSCertificate extension, by extension OID.
fn find_extension<'a>(
    cert_der: &'a [u8],
    oid: &[u8],
) -> Option<&'a [u8]> {
    let (tag, cert, _) = der_read(cert_der)?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    let (tag, tbs, _) = der_read(cert)?;
    if tag != TAG_SEQUENCE {
        return None;
    }
    for (tag, value) in der_children(tbs)? {
        if tag != TAG_EXTENSIONS {
            continue;
        }
        let (tag, exts, _) = der_read(value)?;
        if tag != TAG_SEQUENCE {
            return None;
        }
        for (tag, ext) in der_children(exts)? {
            if tag != TAG_SEQUENCE {
                continue;
            }
            // Extension ::= SEQUENCE { OID, critical?, OCTET STRING }
            let fields = der_children(ext)?;
            let first = fields.first()?;
            if first.0 != TAG_OID || first.1 != oid {
                continue;
            }
            let last = fields.last()?;
            if last.0 == TAG_OCTET_STRING {
                return Some(last.1);
            }
        }
    }
    None
}

fn has_ek_key_usage(cert_der: &[u8]) -> bool {
    let inner =
        match find_extension(cert_der, OID_EXTENDED_KEY_USAGE) {
            Some(inner) => inner,
            None => return false,
        };
    let seq = match der_read(inner) {
        Some((TAG_SEQUENCE, seq, _)) => seq,
        _ => return false,
    };
    der_children(seq)
        .map(|oids| {
            oids.iter().any(|(tag, value)| {
                *tag == TAG_OID && *value == OID_TCG_KP_EK_CERTIFICATE
            })
        })
        .unwrap_or(false)
}

/// A TCG vendor id, "id:" followed by the hex TPM_PT_MANUFACTURER
/// value.
pub(crate) fn parse_vendor_id(text: &str) -> Option<u32> {
    let hex = text.strip_prefix("id:")?;
    u32::from_str_radix(hex, 16).ok()
}

struct TcgSan {
    manufacturer: u32,
    version: u32,
}

/// The TPM identity attributes from the subjectAltName directoryName,
/// per the TCG EK credential profile. `None` when the SAN is absent,
/// ambiguous or incomplete.
fn tcg_san(cert_der: &[u8]) -> Option<TcgSan> {
    let inner = find_extension(cert_der, OID_SUBJECT_ALT_NAME)?;
    let names = match der_read(inner) {
        Some((TAG_SEQUENCE, names, _)) => names,
        _ => return None,
    };

    let directories: Vec<&[u8]> = der_children(names)?
        .into_iter()
        .filter(|(tag, _)| *tag == TAG_DIRECTORY_NAME)
        .map(|(_, value)| value)
        .collect();
    if directories.len() != 1 {
        return None;
    }
    let name = match der_read(directories[0]) {
        Some((TAG_SEQUENCE, name, _)) => name,
        _ => return None,
    };

    let mut manufacturer: Option<u32> = None;
    let mut model: Option<String> = None;
    let mut version: Option<u32> = None;
    for (tag, rdn) in der_children(name)? {
        if tag != TAG_SET {
            continue;
        }
        for (tag, atv) in der_children(rdn)? {
            if tag != TAG_SEQUENCE {
                continue;
            }
            let fields = der_children(atv)?;
            if fields.len() != 2 || fields[0].0 != TAG_OID {
                continue;
            }
            let (vtag, vval) = fields[1];
            let text = match vtag {
                TAG_UTF8_STRING | TAG_PRINTABLE_STRING => {
                    String::from_utf8_lossy(vval).to_string()
                }
                _ => continue,
            };
            let oid = fields[0].1;
            if oid == OID_TCG_TPM_MANUFACTURER {
                if manufacturer
                    .replace(parse_vendor_id(&text)?)
                    .is_some()
                {
                    return None;
                }
            } else if oid == OID_TCG_TPM_MODEL {
                if model.replace(text).is_some() {
                    return None;
                }
            } else if oid == OID_TCG_TPM_VERSION {
                if version.replace(parse_vendor_id(&text)?).is_some() {
                    return None;
                }
            }
        }
    }

    model?;
    Some(TcgSan {
        manufacturer: manufacturer?,
        version: version?,
    })
}

pub struct TpmEndorsementCertificate;

impl Check for TpmEndorsementCertificate {
    fn name(&self) -> &'static str {
        "TPM endorsement key certificate"
    }

    fn verify(
        &self,
        reference: &Reference,
        subj: &Subject,
    ) -> Option<Issue> {
        let der = subj.baseline.endorsement_certificate.as_ref()?;
        if subj.baseline.allow_ek_certificate_unverified
            || subject_has_dummy_tpm(reference, subj)
        {
            return None;
        }
        let cert = match X509::from_der(&der.0) {
            Ok(cert) => cert,
            Err(err) => {
                warn!("unparsable endorsement certificate: {}", err);
                return None;
            }
        };
        let ek_issuer = name_string(cert.issuer_name());
        let issue = |error: &str| Issue::TpmEndorsementCertUnverified {
            args: TpmEndorsementCertUnverifiedArgs {
                ek_issuer: ek_issuer.clone(),
                error: error.to_string(),
                ..Default::default()
            },
        };

        if !has_ek_key_usage(&der.0) {
            info!("endorsement certificate without TCG extKeyUsage");
            return Some(issue(ERR_NO_EKU));
        }

        match reference.verify_endorsement(&cert) {
            Ok(true) => {}
            Ok(false) => {
                info!("endorsement certificate fails chain validation");
                return Some(issue(ERR_INVALID_CERTIFICATE));
            }
            Err(err) => {
                warn!("verify endorsement certificate: {}", err);
                return Some(issue(ERR_INVALID_CERTIFICATE));
            }
        }

        let san = match tcg_san(&der.0) {
            Some(san) => san,
            None => {
                info!("no usable TCG directoryName in EK SAN");
                return Some(issue(ERR_SAN_INVALID));
            }
        };

        let vendor = parse_vendor_id(&subj.values.tpm_vendor)?;
        if vendor != san.manufacturer {
            return Some(Issue::TpmEndorsementCertUnverified {
                args: TpmEndorsementCertUnverifiedArgs {
                    ek_issuer,
                    ek_vendor: san.manufacturer.to_string(),
                    ek_version: san.version.to_string(),
                    vendor: vendor.to_string(),
                    error: ERR_SAN_MISMATCH.to_string(),
                },
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
        if has_issue(overrides, "tpm/endorsement-cert-unverified")
            && !subj.baseline.allow_ek_certificate_unverified
        {
            subj.baseline.allow_ek_certificate_unverified = true;
            subj.baseline_modified = true;
        }
    }
}
