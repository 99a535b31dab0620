// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! TCG PC Client event log decoding and PCR replay.
//!
//! The log is supplied by firmware and must be treated as untrusted input:
//! every length field is bounds checked against the remaining buffer before
//! use. Decoding is done in two passes. The first pass ([`EventLog::parse`])
//! produces generic events carrying per-algorithm digests, enough for
//! [`EventLog::verify`] to replay the hash chain against quoted PCR values.
//! The second pass ([`typed::parse_events`]) decodes the event payloads into
//! their structured forms and may fail per event without affecting replay.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use openssl::hash::{hash, MessageDigest};
use thiserror::Error;

pub mod csme;
pub mod device_path;
pub mod efi;
pub mod ima;
pub mod marshal;
pub mod quirks;
pub mod secure_boot;
pub mod typed;
pub mod unpack;
pub mod windows;

pub const PCR_MAX: u32 = 24;

// TPM algorithm identifiers (TPM_ALG_ID), TPM 2.0 spec part 2, section 6.3.
pub(crate) const TPM_ALG_SHA1: u16 = 0x0004;
pub(crate) const TPM_ALG_SHA256: u16 = 0x000B;
pub(crate) const TPM_ALG_SHA384: u16 = 0x000C;

const SPEC_ID_SIGNATURE: &[u8; 16] = b"Spec ID Event03\0";
const WANT_MAJOR: u8 = 2;
const WANT_MINOR: u8 = 0;

// Upper bound on the algorithm count a Spec ID header may declare. The TCG
// registry defines fewer than a dozen hash algorithms.
const MAX_SPEC_ALGS: u32 = 32;

#[derive(Error, Debug)]
pub enum EventLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("event {sequence} data length {size} exceeds remaining log size {remaining}")]
    TruncatedEvent {
        sequence: usize,
        size: u32,
        remaining: usize,
    },
    #[error("unsupported event log version {major}.{minor}")]
    UnsupportedSpecVersion { major: u8, minor: u8 },
    #[error("implausible algorithm count {0} in Spec ID event")]
    AlgCountOutOfRange(u32),
    #[error("event {sequence} declares {count} digests but the log only carries {max}")]
    DigestCountOutOfRange {
        sequence: usize,
        count: u32,
        max: usize,
    },
    #[error("event {sequence} carries a digest for algorithm {alg:#06x} not declared in the Spec ID event")]
    UndeclaredAlg { sequence: usize, alg: u16 },
    #[error("unknown event type {0:#010x}")]
    UnknownEventType(u32),
    #[error("quoted PCR values use algorithm {0} which the log does not carry")]
    BankNotInLog(HashAlg),
    #[error("quoted PCR values mix hash algorithms")]
    MixedBanks,
    #[error("no quoted PCR values supplied")]
    EmptyQuote,
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

/// Hash algorithms the replay engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
}

impl HashAlg {
    pub fn from_tpm_alg(id: u16) -> Option<HashAlg> {
        match id {
            TPM_ALG_SHA1 => Some(HashAlg::Sha1),
            TPM_ALG_SHA256 => Some(HashAlg::Sha256),
            TPM_ALG_SHA384 => Some(HashAlg::Sha384),
            _ => None,
        }
    }

    pub fn tpm_alg(&self) -> u16 {
        match self {
            HashAlg::Sha1 => TPM_ALG_SHA1,
            HashAlg::Sha256 => TPM_ALG_SHA256,
            HashAlg::Sha384 => TPM_ALG_SHA384,
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }

    fn message_digest(&self) -> MessageDigest {
        match self {
            HashAlg::Sha1 => MessageDigest::sha1(),
            HashAlg::Sha256 => MessageDigest::sha256(),
            HashAlg::Sha384 => MessageDigest::sha384(),
        }
    }

    pub fn hash(
        &self,
        data: &[u8],
    ) -> Result<Vec<u8>, openssl::error::ErrorStack> {
        Ok(hash(self.message_digest(), data)?.to_vec())
    }
}

impl fmt::Display for HashAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlg::Sha1 => write!(f, "SHA1"),
            HashAlg::Sha256 => write!(f, "SHA256"),
            HashAlg::Sha384 => write!(f, "SHA384"),
        }
    }
}

/// A single quoted PCR value, obtained out of band from a TPM quote. This is
/// the ground truth the log must replay to; it is never derived from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrValue {
    pub index: u32,
    pub digest: Vec<u8>,
    pub alg: HashAlg,
}

/// Converts a PCR bank keyed by decimal index strings with hex digests, the
/// shape evidence payloads carry, into [`PcrValue`]s.
pub fn pcrs_from_hex_map(
    bank: &std::collections::HashMap<String, String>,
    alg: HashAlg,
) -> Result<Vec<PcrValue>, crate::error::Error> {
    let mut pcrs = Vec::with_capacity(bank.len());
    for (k, v) in bank {
        let index: u32 = k.parse()?;
        let digest = hex::decode(v)?;
        pcrs.push(PcrValue { index, digest, alg });
    }
    Ok(pcrs)
}

/// Event types per the TCG PC Client Platform Firmware Profile, table 27.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventType {
    PrebootCert = 0x0000_0000,
    PostCode = 0x0000_0001,
    NoAction = 0x0000_0003,
    Separator = 0x0000_0004,
    Action = 0x0000_0005,
    EventTag = 0x0000_0006,
    ScrtmContents = 0x0000_0007,
    ScrtmVersion = 0x0000_0008,
    CpuMicrocode = 0x0000_0009,
    PlatformConfigFlags = 0x0000_000A,
    TableOfDevices = 0x0000_000B,
    CompactHash = 0x0000_000C,
    Ipl = 0x0000_000D,
    IplPartitionData = 0x0000_000E,
    NonhostCode = 0x0000_000F,
    NonhostConfig = 0x0000_0010,
    NonhostInfo = 0x0000_0011,
    OmitBootDeviceEvents = 0x0000_0012,
    EfiEventBase = 0x8000_0000,
    EfiVariableDriverConfig = 0x8000_0001,
    EfiVariableBoot = 0x8000_0002,
    EfiBootServicesApplication = 0x8000_0003,
    EfiBootServicesDriver = 0x8000_0004,
    EfiRuntimeServicesDriver = 0x8000_0005,
    EfiGptEvent = 0x8000_0006,
    EfiAction = 0x8000_0007,
    EfiPlatformFirmwareBlob = 0x8000_0008,
    EfiHandoffTables = 0x8000_0009,
    EfiHcrtmEvent = 0x8000_0010,
    EfiVariableAuthority = 0x8000_00E0,
}

impl TryFrom<u32> for EventType {
    type Error = EventLogError;

    fn try_from(et: u32) -> Result<EventType, EventLogError> {
        let typ = match et {
            0x0000_0000 => EventType::PrebootCert,
            0x0000_0001 => EventType::PostCode,
            0x0000_0003 => EventType::NoAction,
            0x0000_0004 => EventType::Separator,
            0x0000_0005 => EventType::Action,
            0x0000_0006 => EventType::EventTag,
            0x0000_0007 => EventType::ScrtmContents,
            0x0000_0008 => EventType::ScrtmVersion,
            0x0000_0009 => EventType::CpuMicrocode,
            0x0000_000A => EventType::PlatformConfigFlags,
            0x0000_000B => EventType::TableOfDevices,
            0x0000_000C => EventType::CompactHash,
            0x0000_000D => EventType::Ipl,
            0x0000_000E => EventType::IplPartitionData,
            0x0000_000F => EventType::NonhostCode,
            0x0000_0010 => EventType::NonhostConfig,
            0x0000_0011 => EventType::NonhostInfo,
            0x0000_0012 => EventType::OmitBootDeviceEvents,
            0x8000_0000 => EventType::EfiEventBase,
            0x8000_0001 => EventType::EfiVariableDriverConfig,
            0x8000_0002 => EventType::EfiVariableBoot,
            0x8000_0003 => EventType::EfiBootServicesApplication,
            0x8000_0004 => EventType::EfiBootServicesDriver,
            0x8000_0005 => EventType::EfiRuntimeServicesDriver,
            0x8000_0006 => EventType::EfiGptEvent,
            0x8000_0007 => EventType::EfiAction,
            0x8000_0008 => EventType::EfiPlatformFirmwareBlob,
            0x8000_0009 => EventType::EfiHandoffTables,
            0x8000_0010 => EventType::EfiHcrtmEvent,
            0x8000_00E0 => EventType::EfiVariableAuthority,
            _ => return Err(EventLogError::UnknownEventType(et)),
        };
        Ok(typ)
    }
}

/// A replay-validated event for a single algorithm bank.
#[derive(Debug, Clone)]
pub struct Event {
    /// Order of the event in the log, starting at 0.
    pub sequence: usize,
    /// PCR index this event extends.
    pub index: u32,
    pub typ: EventType,
    /// Raw payload, not covered by the digest in general.
    pub data: Vec<u8>,
    /// Digest extended into the PCR.
    pub digest: Vec<u8>,
    pub alg: HashAlg,
}

#[derive(Debug, Clone)]
pub(crate) struct Digest {
    pub(crate) alg: HashAlg,
    pub(crate) data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawEvent {
    pub(crate) sequence: usize,
    pub(crate) index: u32,
    pub(crate) typ: EventType,
    pub(crate) data: Vec<u8>,
    pub(crate) digests: Vec<Digest>,
}

impl RawEvent {
    fn digest_for(&self, alg: HashAlg) -> Option<&[u8]> {
        self.digests
            .iter()
            .find(|d| d.alg == alg)
            .map(|d| d.data.as_slice())
    }
}

/// A mismatch between the replayed hash chain and the quoted value for one
/// PCR. `computed` is empty when the quote covers a PCR the log never
/// extends (and the quote is not the reset value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcrMismatch {
    pub index: u32,
    pub computed: Vec<u8>,
    pub quoted: Vec<u8>,
}

/// Replay succeeded structurally but disagreed with the quote on at least
/// one PCR.
#[derive(Error, Debug, Clone)]
pub struct ReplayError {
    pub invalid: Vec<PcrMismatch>,
}

impl ReplayError {
    pub fn invalid_pcrs(&self) -> Vec<u32> {
        self.invalid.iter().map(|m| m.index).collect()
    }
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pcrs: Vec<String> = self
            .invalid
            .iter()
            .map(|m| m.index.to_string())
            .collect();
        write!(
            f,
            "event log does not match quoted PCRs [{}]",
            pcrs.join(", ")
        )
    }
}

struct SpecAlg {
    id: u16,
    size: u16,
}

struct SpecIdEvent {
    algs: Vec<SpecAlg>,
}

/// A decoded event log ready for replay.
#[derive(Debug, Clone)]
pub struct EventLog {
    /// Digest algorithms the log carries, strongest last.
    pub algs: Vec<HashAlg>,
    pub(crate) raw_events: Vec<RawEvent>,
}

impl EventLog {
    /// Decodes raw log bytes in either the legacy fixed SHA-1 format or the
    /// crypto-agile format announced by a leading Spec ID EV_NO_ACTION event.
    pub fn parse(raw: &[u8]) -> Result<EventLog, EventLogError> {
        let mut cur = Cursor::new(raw);
        let first = parse_raw_event(&mut cur, 0)?;

        if first.typ == EventType::NoAction
            && first.data.len() >= SPEC_ID_SIGNATURE.len()
            && first.data[..SPEC_ID_SIGNATURE.len()] == SPEC_ID_SIGNATURE[..]
        {
            let spec = parse_spec_id_event(&first.data)?;
            let mut algs = Vec::new();
            for alg in &spec.algs {
                if let Some(a) = HashAlg::from_tpm_alg(alg.id) {
                    algs.push(a);
                }
            }
            let mut raw_events = Vec::new();
            let mut sequence = 0;
            while (cur.position() as usize) < raw.len() {
                raw_events.push(parse_raw_event2(&mut cur, sequence, &spec)?);
                sequence += 1;
            }
            return Ok(EventLog { algs, raw_events });
        }

        // Legacy logs carry a single implicit SHA-1 digest per record. An
        // EV_NO_ACTION first event that is not a Spec ID event still belongs
        // to a legacy log.
        cur.set_position(0);
        let mut raw_events = Vec::new();
        let mut sequence = 0;
        while (cur.position() as usize) < raw.len() {
            raw_events.push(parse_raw_event(&mut cur, sequence)?);
            sequence += 1;
        }
        Ok(EventLog {
            algs: vec![HashAlg::Sha1],
            raw_events,
        })
    }

    /// Replays the log against one bank of quoted PCR values and returns the
    /// events for the quoted PCR indices on success. All quoted values must
    /// use the same algorithm and the log must carry a digest bank for it.
    ///
    /// When the straight replay fails, the documented firmware workarounds
    /// from [`quirks`] whose affected PCR is among the mismatches are tried
    /// one by one; the first one that makes the whole quote replay wins.
    pub fn verify(
        &self,
        pcrs: &[PcrValue],
    ) -> Result<Vec<Event>, EventLogError> {
        let alg = match pcrs.first() {
            Some(p) => p.alg,
            None => return Err(EventLogError::EmptyQuote),
        };
        if pcrs.iter().any(|p| p.alg != alg) {
            return Err(EventLogError::MixedBanks);
        }
        if !self.algs.contains(&alg) {
            return Err(EventLogError::BankNotInLog(alg));
        }

        let invalid = self.replay(alg, pcrs)?;
        if invalid.is_empty() {
            return Ok(self.bank_events(alg, pcrs));
        }

        for workaround in quirks::WORKAROUNDS {
            if !invalid.iter().any(|m| m.index == workaround.affected_pcr) {
                continue;
            }
            let mut patched = self.clone();
            (workaround.apply)(&mut patched)?;
            if patched.replay(alg, pcrs)?.is_empty() {
                log::debug!(
                    "event log replays with workaround {:?}",
                    workaround.id
                );
                return Ok(patched.bank_events(alg, pcrs));
            }
        }

        Err(ReplayError { invalid }.into())
    }

    /// Folds every event touching each quoted PCR into a running digest and
    /// compares with the quote. Returns the list of disagreeing PCRs.
    fn replay(
        &self,
        alg: HashAlg,
        pcrs: &[PcrValue],
    ) -> Result<Vec<PcrMismatch>, EventLogError> {
        let mut invalid = Vec::new();
        for pcr in pcrs {
            let mut running: Option<Vec<u8>> = None;
            let mut broken = false;
            for event in
                self.raw_events.iter().filter(|e| e.index == pcr.index)
            {
                let digest = match event.digest_for(alg) {
                    Some(d) => d,
                    None => {
                        broken = true;
                        break;
                    }
                };
                let mut buf = running
                    .take()
                    .unwrap_or_else(|| vec![0u8; alg.digest_len()]);
                buf.extend_from_slice(digest);
                running = Some(alg.hash(&buf)?);
            }
            match running {
                _ if broken => invalid.push(PcrMismatch {
                    index: pcr.index,
                    computed: Vec::new(),
                    quoted: pcr.digest.clone(),
                }),
                Some(computed) => {
                    if computed != pcr.digest {
                        invalid.push(PcrMismatch {
                            index: pcr.index,
                            computed,
                            quoted: pcr.digest.clone(),
                        });
                    }
                }
                None => {
                    // The log never extends this PCR. That is fine as long
                    // as the quote shows the reset value, 0x00-filled for
                    // PCR 0-16 and 0xFF-filled for the resettable 17-22.
                    if pcr.digest != reset_value(pcr.index, alg.digest_len())
                    {
                        invalid.push(PcrMismatch {
                            index: pcr.index,
                            computed: Vec::new(),
                            quoted: pcr.digest.clone(),
                        });
                    }
                }
            }
        }
        Ok(invalid)
    }

    /// Projects every raw event onto one algorithm bank. Events that carry
    /// no digest for the bank are skipped.
    pub fn events(&self, alg: HashAlg) -> Vec<Event> {
        self.raw_events
            .iter()
            .filter_map(|e| {
                e.digest_for(alg).map(|digest| Event {
                    sequence: e.sequence,
                    index: e.index,
                    typ: e.typ,
                    data: e.data.clone(),
                    digest: digest.to_vec(),
                    alg,
                })
            })
            .collect()
    }

    /// Computes the replayed value of each requested PCR in one bank,
    /// without comparing against a quote. PCRs the log never extends come
    /// back as the 0x00-filled reset value. Events missing a digest for the
    /// bank are skipped.
    pub fn compute_pcrs(
        &self,
        alg: HashAlg,
        indices: &[u32],
    ) -> Result<Vec<Vec<u8>>, EventLogError> {
        let mut out = Vec::with_capacity(indices.len());
        for &index in indices {
            let mut running = vec![0u8; alg.digest_len()];
            for event in
                self.raw_events.iter().filter(|e| e.index == index)
            {
                let digest = match event.digest_for(alg) {
                    Some(d) => d,
                    None => continue,
                };
                let mut buf = running;
                buf.extend_from_slice(digest);
                running = alg.hash(&buf)?;
            }
            out.push(running);
        }
        Ok(out)
    }

    /// Projects the raw events onto one algorithm bank, restricted to the
    /// quoted PCR indices. Events outside the replayed set are withheld.
    fn bank_events(&self, alg: HashAlg, pcrs: &[PcrValue]) -> Vec<Event> {
        self.raw_events
            .iter()
            .filter(|e| pcrs.iter().any(|p| p.index == e.index))
            .filter_map(|e| {
                e.digest_for(alg).map(|digest| Event {
                    sequence: e.sequence,
                    index: e.index,
                    typ: e.typ,
                    data: e.data.clone(),
                    digest: digest.to_vec(),
                    alg,
                })
            })
            .collect()
    }
}

fn reset_value(index: u32, len: usize) -> Vec<u8> {
    if (17..=22).contains(&index) {
        vec![0xFF; len]
    } else {
        vec![0x00; len]
    }
}

fn parse_raw_event(
    cur: &mut Cursor<&[u8]>,
    sequence: usize,
) -> Result<RawEvent, EventLogError> {
    let index = cur.read_u32::<LittleEndian>()?;
    let typ = EventType::try_from(cur.read_u32::<LittleEndian>()?)?;
    let mut digest = vec![0u8; 20];
    cur.read_exact(&mut digest)?;
    let size = cur.read_u32::<LittleEndian>()?;
    let remaining = remaining(cur);
    if size as usize > remaining {
        return Err(EventLogError::TruncatedEvent {
            sequence,
            size,
            remaining,
        });
    }
    let mut data = vec![0u8; size as usize];
    cur.read_exact(&mut data)?;
    Ok(RawEvent {
        sequence,
        index,
        typ,
        data,
        digests: vec![Digest {
            alg: HashAlg::Sha1,
            data: digest,
        }],
    })
}

fn parse_raw_event2(
    cur: &mut Cursor<&[u8]>,
    sequence: usize,
    spec: &SpecIdEvent,
) -> Result<RawEvent, EventLogError> {
    let index = cur.read_u32::<LittleEndian>()?;
    let typ = EventType::try_from(cur.read_u32::<LittleEndian>()?)?;
    let count = cur.read_u32::<LittleEndian>()?;
    if count as usize > spec.algs.len() {
        return Err(EventLogError::DigestCountOutOfRange {
            sequence,
            count,
            max: spec.algs.len(),
        });
    }
    let mut digests = Vec::new();
    for _ in 0..count {
        let id = cur.read_u16::<LittleEndian>()?;
        let size = match spec.algs.iter().find(|a| a.id == id) {
            Some(a) => a.size as usize,
            None => {
                return Err(EventLogError::UndeclaredAlg { sequence, alg: id })
            }
        };
        let mut digest = vec![0u8; size];
        cur.read_exact(&mut digest)?;
        if let Some(alg) = HashAlg::from_tpm_alg(id) {
            digests.push(Digest { alg, data: digest });
        }
    }
    let size = cur.read_u32::<LittleEndian>()?;
    let remaining = remaining(cur);
    if size as usize > remaining {
        return Err(EventLogError::TruncatedEvent {
            sequence,
            size,
            remaining,
        });
    }
    let mut data = vec![0u8; size as usize];
    cur.read_exact(&mut data)?;
    Ok(RawEvent {
        sequence,
        index,
        typ,
        data,
        digests,
    })
}

fn parse_spec_id_event(
    data: &[u8],
) -> Result<SpecIdEvent, EventLogError> {
    let mut cur = Cursor::new(data);
    let mut signature = [0u8; 16];
    cur.read_exact(&mut signature)?;
    let _platform_class = cur.read_u32::<LittleEndian>()?;
    let minor = cur.read_u8()?;
    let major = cur.read_u8()?;
    let _errata = cur.read_u8()?;
    let _uintn_size = cur.read_u8()?;
    if major != WANT_MAJOR || minor != WANT_MINOR {
        return Err(EventLogError::UnsupportedSpecVersion { major, minor });
    }
    let num_algs = cur.read_u32::<LittleEndian>()?;
    if num_algs == 0
        || num_algs > MAX_SPEC_ALGS
        || num_algs as usize * 4 > remaining(&cur)
    {
        return Err(EventLogError::AlgCountOutOfRange(num_algs));
    }
    let mut algs = Vec::with_capacity(num_algs as usize);
    for _ in 0..num_algs {
        let id = cur.read_u16::<LittleEndian>()?;
        let size = cur.read_u16::<LittleEndian>()?;
        algs.push(SpecAlg { id, size });
    }
    Ok(SpecIdEvent { algs })
}

fn remaining(cur: &Cursor<&[u8]>) -> usize {
    cur.get_ref().len().saturating_sub(cur.position() as usize)
}
