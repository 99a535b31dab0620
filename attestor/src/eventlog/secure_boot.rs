// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Secure Boot configuration recovery from PCR 7. The firmware measures
//! the SecureBoot variable, the key hierarchy (PK, KEK, db, dbx) and every
//! authority it used to verify a binary. The events are strictly ordered:
//! variables come before the separator, authority events may appear on
//! either side of it.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use openssl::x509::X509;
use thiserror::Error;

use super::efi::{parse_signature, EfiError, UefiVariableData};
use super::{Event, EventType, HashAlg};

#[derive(Error, Debug)]
pub enum SecureBootError {
    #[error("duplicate separator at event {0}")]
    DuplicateSeparator(usize),
    #[error("invalid separator data at event {0}")]
    InvalidSeparatorData(usize),
    #[error("invalid {what} digest at event {sequence}")]
    InvalidDigest {
        sequence: usize,
        what: &'static str,
    },
    #[error("a UEFI debugger was present during boot")]
    DebuggerPresent,
    #[error("unexpected EFI action event at event {0}")]
    UnexpectedAction(usize),
    #[error("failed parsing EFI variable at event {0}: {1}")]
    Variable(usize, EfiError),
    #[error("duplicate EFI variable {0:?} at event {1}")]
    DuplicateVariable(String, usize),
    #[error("variable {0:?} specified after separator at event {1}")]
    VariableAfterSeparator(String, usize),
    #[error("SecureBoot data len is {0} at event {1}, expected 1")]
    SecureBootLength(usize, usize),
    #[error("failed parsing {what} at event {sequence}: {source}")]
    SignatureDatabase {
        sequence: usize,
        what: &'static str,
        source: EfiError,
    },
    #[error("unexpected event type {0:?} on PCR 7")]
    UnexpectedEventType(EventType),
    #[error("secure boot was enabled but no key was used")]
    NoAuthority,
    #[error("secure boot was enabled but no platform keys were known")]
    NoPlatformKeys,
    #[error("secure boot was enabled but no key exchange keys were known")]
    NoExchangeKeys,
    #[error("secure boot was enabled but no keys or hashes were permitted")]
    NoPermittedKeys,
}

/// Secure Boot status as measured into PCR 7.
#[derive(Debug, Clone, Default)]
pub struct SecureBootState {
    pub enabled: bool,

    /// Keys which can sign a key exchange key.
    pub platform_keys: Vec<X509>,
    pub platform_key_hashes: Vec<Vec<u8>>,

    /// Keys which can sign a database of permitted or forbidden keys.
    pub exchange_keys: Vec<X509>,
    pub exchange_key_hashes: Vec<Vec<u8>>,

    /// Keys which may sign binaries to run.
    pub permitted_keys: Vec<X509>,
    pub permitted_hashes: Vec<Vec<u8>>,

    /// Keys which must not permit a binary to run.
    pub forbidden_keys: Vec<X509>,
    pub forbidden_hashes: Vec<Vec<u8>>,

    /// Authorities used to verify a binary before the separator.
    pub pre_separator_authority: Vec<X509>,
    /// Authorities used to verify a binary after the separator.
    pub post_separator_authority: Vec<X509>,
}

/// Recovers the Secure Boot configuration from the PCR 7 events of one
/// verified bank. Fails when the event structure suggests tampering:
/// unexpected event types, bad payload digests, variables measured after
/// the separator or an attached UEFI debugger.
pub fn parse_secure_boot_state(
    events: &[Event],
) -> Result<SecureBootState, SecureBootError> {
    let mut out = SecureBootState::default();
    let mut seen_separator: HashSet<HashAlg> = HashSet::new();
    let mut seen_authority: HashSet<HashAlg> = HashSet::new();
    let mut seen_vars: HashMap<String, HashSet<HashAlg>> = HashMap::new();

    for e in events {
        if e.index != 7 {
            continue;
        }
        let digest_ok = e
            .alg
            .hash(&e.data)
            .map(|computed| computed == e.digest)
            .unwrap_or(false);

        match e.typ {
            EventType::Separator => {
                if !seen_separator.insert(e.alg) {
                    return Err(SecureBootError::DuplicateSeparator(
                        e.sequence,
                    ));
                }
                if e.data != [0, 0, 0, 0] {
                    return Err(SecureBootError::InvalidSeparatorData(
                        e.sequence,
                    ));
                }
                if !digest_ok {
                    return Err(SecureBootError::InvalidDigest {
                        sequence: e.sequence,
                        what: "separator",
                    });
                }
            }
            EventType::EfiAction => {
                if e.data == b"UEFI Debug Mode" {
                    return Err(SecureBootError::DebuggerPresent);
                }
                return Err(SecureBootError::UnexpectedAction(e.sequence));
            }
            EventType::EfiVariableDriverConfig => {
                let v = UefiVariableData::parse(&mut Cursor::new(
                    e.data.as_slice(),
                ))
                .map_err(|err| {
                    SecureBootError::Variable(e.sequence, err)
                })?;
                let name = v.name();
                if !seen_vars.entry(name.clone()).or_default().insert(e.alg)
                {
                    return Err(SecureBootError::DuplicateVariable(
                        name, e.sequence,
                    ));
                }
                if seen_separator.contains(&e.alg) {
                    return Err(SecureBootError::VariableAfterSeparator(
                        name, e.sequence,
                    ));
                }
                if !digest_ok {
                    return Err(SecureBootError::InvalidDigest {
                        sequence: e.sequence,
                        what: "variable",
                    });
                }

                match name.as_str() {
                    "SecureBoot" => {
                        if v.data.len() != 1 {
                            return Err(SecureBootError::SecureBootLength(
                                v.data.len(),
                                e.sequence,
                            ));
                        }
                        out.enabled = v.data[0] == 1;
                    }
                    "PK" => {
                        (out.platform_keys, out.platform_key_hashes) =
                            database(&v, e.sequence, "platform keys")?;
                    }
                    "KEK" => {
                        (out.exchange_keys, out.exchange_key_hashes) =
                            database(&v, e.sequence, "key exchange keys")?;
                    }
                    "db" => {
                        (out.permitted_keys, out.permitted_hashes) =
                            database(&v, e.sequence, "signature database")?;
                    }
                    "dbx" => {
                        (out.forbidden_keys, out.forbidden_hashes) =
                            database(
                                &v,
                                e.sequence,
                                "forbidden signature database",
                            )?;
                    }
                    _ => {}
                }
            }
            EventType::EfiVariableAuthority => {
                let v = UefiVariableData::parse(&mut Cursor::new(
                    e.data.as_slice(),
                ))
                .map_err(|err| {
                    SecureBootError::Variable(e.sequence, err)
                })?;
                let (cert, missing_guid) = parse_signature(&v.data)
                    .map_err(|err| {
                        SecureBootError::Variable(e.sequence, err)
                    })?;
                let verified = if missing_guid && !digest_ok {
                    // Events from shim builds without the trailing-byte
                    // fix fail digest verification as recorded; dropping
                    // the last byte recovers the measured payload.
                    !e.data.is_empty()
                        && e.alg
                            .hash(&e.data[..e.data.len() - 1])
                            .map(|computed| computed == e.digest)
                            .unwrap_or(false)
                } else {
                    digest_ok
                };
                seen_authority.insert(e.alg);
                if !verified {
                    return Err(SecureBootError::InvalidDigest {
                        sequence: e.sequence,
                        what: "authority",
                    });
                }
                if seen_separator.contains(&e.alg) {
                    out.post_separator_authority.push(cert);
                } else {
                    out.pre_separator_authority.push(cert);
                }
            }
            typ => return Err(SecureBootError::UnexpectedEventType(typ)),
        }
    }

    if !out.enabled {
        return Ok(out);
    }
    if seen_authority.is_empty() {
        return Err(SecureBootError::NoAuthority);
    }
    if out.platform_keys.is_empty() && out.platform_key_hashes.is_empty() {
        return Err(SecureBootError::NoPlatformKeys);
    }
    if out.exchange_keys.is_empty() && out.exchange_key_hashes.is_empty() {
        return Err(SecureBootError::NoExchangeKeys);
    }
    if out.permitted_keys.is_empty() && out.permitted_hashes.is_empty() {
        return Err(SecureBootError::NoPermittedKeys);
    }
    Ok(out)
}

fn database(
    v: &UefiVariableData,
    sequence: usize,
    what: &'static str,
) -> Result<(Vec<X509>, Vec<Vec<u8>>), SecureBootError> {
    v.signature_data().map_err(|source| {
        SecureBootError::SignatureDatabase {
            sequence,
            what,
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::efi::EFI_GLOBAL_VARIABLE;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn variable_data(name: &str, data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(EFI_GLOBAL_VARIABLE.data1).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(EFI_GLOBAL_VARIABLE.data2).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(EFI_GLOBAL_VARIABLE.data3).unwrap(); //#[allow_ci]
        b.extend_from_slice(&EFI_GLOBAL_VARIABLE.data4);
        b.write_u64::<LittleEndian>(name.len() as u64).unwrap(); //#[allow_ci]
        b.write_u64::<LittleEndian>(data.len() as u64).unwrap(); //#[allow_ci]
        for c in name.encode_utf16() {
            b.write_u16::<LittleEndian>(c).unwrap(); //#[allow_ci]
        }
        b.extend_from_slice(data);
        b
    }

    fn event(
        sequence: usize,
        typ: EventType,
        data: Vec<u8>,
    ) -> Event {
        Event {
            sequence,
            index: 7,
            typ,
            digest: HashAlg::Sha256.hash(&data).unwrap(), //#[allow_ci]
            alg: HashAlg::Sha256,
            data,
        }
    }

    #[test]
    fn disabled_secure_boot() {
        let events = [
            event(
                0,
                EventType::EfiVariableDriverConfig,
                variable_data("SecureBoot", &[0]),
            ),
            event(1, EventType::Separator, vec![0, 0, 0, 0]),
        ];
        let state = parse_secure_boot_state(&events).unwrap(); //#[allow_ci]
        assert!(!state.enabled);
    }

    #[test]
    fn enabled_without_authority_rejected() {
        let events = [
            event(
                0,
                EventType::EfiVariableDriverConfig,
                variable_data("SecureBoot", &[1]),
            ),
            event(1, EventType::Separator, vec![0, 0, 0, 0]),
        ];
        assert!(matches!(
            parse_secure_boot_state(&events),
            Err(SecureBootError::NoAuthority)
        ));
    }

    #[test]
    fn debugger_rejected() {
        let events = [event(
            0,
            EventType::EfiAction,
            b"UEFI Debug Mode".to_vec(),
        )];
        assert!(matches!(
            parse_secure_boot_state(&events),
            Err(SecureBootError::DebuggerPresent)
        ));
    }

    #[test]
    fn variable_after_separator_rejected() {
        let events = [
            event(0, EventType::Separator, vec![0, 0, 0, 0]),
            event(
                1,
                EventType::EfiVariableDriverConfig,
                variable_data("SecureBoot", &[1]),
            ),
        ];
        assert!(matches!(
            parse_secure_boot_state(&events),
            Err(SecureBootError::VariableAfterSeparator(_, 1))
        ));
    }

    #[test]
    fn duplicate_variable_rejected() {
        let data = variable_data("SecureBoot", &[0]);
        let events = [
            event(0, EventType::EfiVariableDriverConfig, data.clone()),
            event(1, EventType::EfiVariableDriverConfig, data),
        ];
        assert!(matches!(
            parse_secure_boot_state(&events),
            Err(SecureBootError::DuplicateVariable(_, 1))
        ));
    }

    #[test]
    fn tampered_separator_rejected() {
        let mut sep = event(0, EventType::Separator, vec![0, 0, 0, 0]);
        sep.digest[0] ^= 0x01;
        assert!(matches!(
            parse_secure_boot_state(&[sep]),
            Err(SecureBootError::InvalidDigest {
                sequence: 0,
                what: "separator"
            })
        ));
    }

    #[test]
    fn bad_secure_boot_length_rejected() {
        let events = [event(
            0,
            EventType::EfiVariableDriverConfig,
            variable_data("SecureBoot", &[1, 0]),
        )];
        assert!(matches!(
            parse_secure_boot_state(&events),
            Err(SecureBootError::SecureBootLength(2, 0))
        ));
    }

    #[test]
    fn other_pcrs_ignored() {
        let mut boot_order = event(
            0,
            EventType::EfiVariableBoot,
            variable_data("BootOrder", &[0, 0]),
        );
        boot_order.index = 1;
        let state = parse_secure_boot_state(&[boot_order]).unwrap(); //#[allow_ci]
        assert!(!state.enabled);
    }
}
