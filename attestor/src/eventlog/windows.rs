// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Windows Boot Configuration Log (SIPA) decoding. Windows measures its
//! boot configuration as tagged events on PCR 12 and 13; each tagged event
//! is a container of nested sub-events sharing a {type, size} header. The
//! extracted facts are untrustworthy unless the enclosing TCG events have
//! already been replay-validated.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::{Event, EventType};

// SIPA event type classes.
pub(crate) const SIPA_TYPE_MASK: u32 = 0x000f_0000;
pub(crate) const SIPA_CONTAINER: u32 = 0x0001_0000;

// SIPA event types referenced by the extraction below.
const ELAM_AGGREGATION: u32 = 0x4001_0002;
const LOADED_MODULE_AGGREGATION: u32 = 0x4001_0003;
const TRUSTPOINT_AGGREGATION: u32 = 0xC001_0004;
const BOOT_COUNTER: u32 = 0x0002_0002;
const TRANSFER_CONTROL: u32 = 0x0002_0003;
const BITLOCKER_UNLOCK: u32 = 0x0002_0005;
const EVENT_COUNTER: u32 = 0x0002_0006;
const COUNTER_ID: u32 = 0x0002_0007;
const BOOT_DEBUGGING: u32 = 0x0004_0001;
const BOOT_REVOCATION_LIST: u32 = 0x0004_0002;
const OS_KERNEL_DEBUG: u32 = 0x0005_0001;
const CODE_INTEGRITY: u32 = 0x0005_0002;
const TEST_SIGNING: u32 = 0x0005_0003;
const DATA_EXECUTION_PREVENTION: u32 = 0x0005_0004;
const SYSTEM_ROOT: u32 = 0x0005_0009;
const FILE_PATH: u32 = 0x0007_0001;
const IMAGE_SIZE: u32 = 0x0007_0002;
const HASH_ALGORITHM_ID: u32 = 0x0007_0003;
const AUTHENTICODE_HASH: u32 = 0x0007_0004;
const AUTHORITY_ISSUER: u32 = 0x0007_0005;
const AUTHORITY_SERIAL: u32 = 0x0007_0006;
const IMAGE_BASE: u32 = 0x0007_0007;
const AUTHORITY_PUBLISHER: u32 = 0x0007_0008;
const AUTHORITY_SHA1_THUMBPRINT: u32 = 0x0007_0009;
const IMAGE_VALIDATED: u32 = 0x0007_000A;
const MODULE_SVN: u32 = 0x0007_000B;
const QUOTE: u32 = 0x8008_0001;
const QUOTE_SIGNATURE: u32 = 0x8008_0002;
const AIK_ID: u32 = 0x8008_0003;
const AIK_PUB_DIGEST: u32 = 0x8008_0004;
const ELAM_KEYNAME: u32 = 0x0009_0001;
const ELAM_CONFIGURATION: u32 = 0x0009_0002;
const ELAM_POLICY: u32 = 0x0009_0003;
const ELAM_MEASURED: u32 = 0x0009_0004;

// Pseudo PCR index Windows uses for trust point quotes.
const PCR_TRUSTPOINT: u32 = 0xFFFF_FFFF;

#[derive(Error, Debug)]
pub enum WinLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid tagged event structure at event {0}")]
    InvalidTaggedEvent(usize),
    #[error("invalid digest for event {0} (PCR {1})")]
    DigestMismatch(usize, u32),
    #[error("duplicate WBCL separator at event {0}")]
    DuplicateSeparator(usize),
    #[error("invalid WBCL separator data at event {0}")]
    InvalidSeparator(usize),
    #[error("unexpected event type {0:?} on PCR {1}")]
    UnexpectedEventType(EventType, u32),
    #[error("expected container event, got {0:#010x}")]
    NotAContainer(u32),
    #[error("sub-event is larger than available data: {0} > {1}")]
    SubEventTooLarge(u32, usize),
    #[error("payload was {got} bytes, want {want}")]
    PayloadSize { want: u32, got: u32 },
    #[error("duplicate {0} field in aggregation event")]
    DuplicateField(&'static str),
    #[error("conflicting values for {0}: {1} != {2}")]
    ConflictingCounter(&'static str, u64, u64),
    #[error("unknown algorithm ID: {0:#x}")]
    UnknownAlgorithm(u32),
    #[error("unknown event {0:#010x} in aggregation")]
    UnknownAggregationEvent(u32),
    #[error("bitlocker data too large ({0} bytes)")]
    BitlockerTooLarge(u32),
    #[error("invalid varint")]
    InvalidVarint,
    #[error("ELAM driver name not specified")]
    MissingDriverName,
    #[error("AIK id not specified")]
    MissingAikId,
}

/// Hash algorithm IDs used by the Windows CSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WinCspAlg {
    #[default]
    Unknown,
    Md4,
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl WinCspAlg {
    fn from_id(id: u32) -> Option<WinCspAlg> {
        match id & 0xff {
            0x02 => Some(WinCspAlg::Md4),
            0x03 => Some(WinCspAlg::Md5),
            0x04 => Some(WinCspAlg::Sha1),
            0x0c => Some(WinCspAlg::Sha256),
            0x0d => Some(WinCspAlg::Sha384),
            0x0e => Some(WinCspAlg::Sha512),
            _ => None,
        }
    }
}

/// A boolean that can additionally be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ternary {
    #[default]
    Unknown,
    True,
    False,
}

/// How a BitLocker volume was unlocked.
pub type BitlockerStatus = u8;

pub const BITLOCKER_STATUS_CACHED: BitlockerStatus = 0x01;
pub const BITLOCKER_STATUS_MEDIA: BitlockerStatus = 0x02;
pub const BITLOCKER_STATUS_TPM: BitlockerStatus = 0x04;
pub const BITLOCKER_STATUS_PIN: BitlockerStatus = 0x10;
pub const BITLOCKER_STATUS_EXTERNAL: BitlockerStatus = 0x20;
pub const BITLOCKER_STATUS_RECOVERY: BitlockerStatus = 0x40;

#[derive(Debug, Clone, Default)]
pub struct WinModuleLoad {
    pub file_path: String,
    pub authenticode_hash: Vec<u8>,
    pub image_base: Vec<u64>,
    pub image_size: u64,
    pub hash_algorithm: WinCspAlg,
    pub image_validated: bool,
    pub authority_issuer: String,
    pub authority_publisher: String,
    pub authority_serial: Vec<u8>,
    pub authority_sha1: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct WinElam {
    pub measured: Vec<u8>,
    pub config: Vec<u8>,
    pub policy: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct WinWbclQuote {
    pub aik_pub_digest: Vec<u8>,
    pub quote: Vec<u8>,
    pub quote_signature: Vec<u8>,
}

/// Boot configuration facts extracted from the SIPA events.
#[derive(Debug, Clone, Default)]
pub struct WinEvents {
    /// True when bootmgr launched winload rather than winresume.
    pub cold_boot: bool,
    pub boot_count: u64,
    pub event_count: u64,
    pub event_counter_id: u64,
    /// Modules loaded during boot, keyed by hex Authenticode hash.
    pub loaded_modules: HashMap<String, WinModuleLoad>,
    /// Early Launch Anti-Malware drivers, keyed by driver name.
    pub elam: HashMap<String, WinElam>,
    pub trust_point_quote: HashMap<String, WinWbclQuote>,
    pub boot_debugging_enabled: bool,
    pub kernel_debug_enabled: bool,
    pub dep_enabled: Ternary,
    pub code_integrity_enabled: Ternary,
    pub test_signing_enabled: bool,
    pub bitlocker_unlocks: Vec<BitlockerStatus>,
}

/// One sub-event from a Microsoft tagged event container, in generic form.
#[derive(Debug, Clone)]
pub enum MicrosoftEvent {
    String { typ: u32, message: String },
    Revocation {
        typ: u32,
        creation_time: u64,
        hash_algorithm: u32,
        digest: Vec<u8>,
    },
    Data { typ: u32, data: Vec<u8> },
}

struct SubEvent<'a> {
    typ: u32,
    data: &'a [u8],
}

/// Reads one {type, size} framed sub-event, bounds checked.
fn read_sub_event<'a>(
    cur: &mut Cursor<&'a [u8]>,
) -> Result<SubEvent<'a>, WinLogError> {
    let typ = cur.read_u32::<LittleEndian>()?;
    let size = cur.read_u32::<LittleEndian>()?;
    let start = cur.position() as usize;
    let buf = *cur.get_ref();
    let remaining = buf.len().saturating_sub(start);
    if size as usize > remaining {
        return Err(WinLogError::SubEventTooLarge(size, remaining));
    }
    cur.set_position((start + size as usize) as u64);
    Ok(SubEvent {
        typ,
        data: &buf[start..start + size as usize],
    })
}

fn parse_utf16(data: &[u8]) -> String {
    let wide: Vec<u16> = data
        .chunks_exact(2)
        .map(|p| u16::from_le_bytes([p[0], p[1]]))
        .collect();
    String::from_utf16_lossy(&wide)
        .trim_end_matches('\u{0}')
        .to_owned()
}

fn read_u64_payload(data: &[u8]) -> Result<u64, WinLogError> {
    if data.len() != 8 {
        return Err(WinLogError::PayloadSize {
            want: 8,
            got: data.len() as u32,
        });
    }
    Ok(u64::from_le_bytes(data.try_into().unwrap_or_default()))
}

fn read_u32_payload(data: &[u8]) -> Result<u32, WinLogError> {
    if data.len() != 4 {
        return Err(WinLogError::PayloadSize {
            want: 4,
            got: data.len() as u32,
        });
    }
    Ok(u32::from_le_bytes(data.try_into().unwrap_or_default()))
}

fn read_uvarint(data: &[u8]) -> Result<u64, WinLogError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for &byte in data {
        if shift >= 64 {
            return Err(WinLogError::InvalidVarint);
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(WinLogError::InvalidVarint)
}

/// Extracts Windows boot configuration from the replay-validated events of
/// one log bank. PCR 12 carries the early boot events, PCR 13 the post
/// early boot ones, and the pseudo PCR -1 the trust point quotes.
pub fn parse_win_events(events: &[Event]) -> Result<WinEvents, WinLogError> {
    let mut out = WinEvents::default();
    let mut seen_separator_12 = false;
    let mut seen_separator_13 = false;

    for e in events {
        if e.index != 12 && e.index != 13 && e.index != PCR_TRUSTPOINT {
            continue;
        }

        let digest_ok = e
            .alg
            .hash(&e.data)
            .map(|computed| computed == e.digest)
            .unwrap_or(false);

        match (e.index, e.typ) {
            (12, EventType::EventTag) | (13, EventType::EventTag) => {
                let seen = if e.index == 12 {
                    &mut seen_separator_12
                } else {
                    &mut seen_separator_13
                };
                if *seen {
                    continue;
                }
                if !digest_ok {
                    return Err(WinLogError::DigestMismatch(
                        e.sequence, e.index,
                    ));
                }
                let tagged = crate::eventlog::efi::TaggedEventData::parse(
                    &e.data,
                )
                .map_err(|_| {
                    WinLogError::InvalidTaggedEvent(e.sequence)
                })?;
                out.read_event_block(&tagged, e.index)?;
            }
            (12, EventType::Separator) | (13, EventType::Separator) => {
                let seen = if e.index == 12 {
                    &mut seen_separator_12
                } else {
                    &mut seen_separator_13
                };
                if *seen {
                    return Err(WinLogError::DuplicateSeparator(e.sequence));
                }
                *seen = true;
                if e.data != b"WBCL" {
                    return Err(WinLogError::InvalidSeparator(e.sequence));
                }
                if !digest_ok {
                    return Err(WinLogError::DigestMismatch(
                        e.sequence, e.index,
                    ));
                }
            }
            (PCR_TRUSTPOINT, EventType::NoAction) => {
                let tagged = crate::eventlog::efi::TaggedEventData::parse(
                    &e.data,
                )
                .map_err(|_| {
                    WinLogError::InvalidTaggedEvent(e.sequence)
                })?;
                out.read_outer_trust_point(&tagged)?;
            }
            (index, typ) => {
                return Err(WinLogError::UnexpectedEventType(typ, index))
            }
        }
    }
    Ok(out)
}

impl WinEvents {
    /// Consumes every SIPA sub-event in an enclosing container event.
    /// Unknown sub-events are skipped; their bytes are covered by the
    /// already verified TCG event digest.
    fn read_event_block(
        &mut self,
        tagged: &crate::eventlog::efi::TaggedEventData,
        pcr: u32,
    ) -> Result<(), WinLogError> {
        if tagged.id & SIPA_TYPE_MASK != SIPA_CONTAINER {
            return Err(WinLogError::NotAContainer(tagged.id));
        }
        let mut cur = Cursor::new(tagged.data.as_slice());
        while (cur.position() as usize) < tagged.data.len() {
            let sub = read_sub_event(&mut cur)?;
            self.read_sipa_event(&sub, pcr)?;
        }
        Ok(())
    }

    fn read_sipa_event(
        &mut self,
        sub: &SubEvent<'_>,
        pcr: u32,
    ) -> Result<(), WinLogError> {
        match sub.typ {
            ELAM_AGGREGATION => self.read_elam_aggregation(sub.data),
            LOADED_MODULE_AGGREGATION => {
                self.read_loaded_module_aggregation(sub.data)
            }
            BOOT_COUNTER => {
                let i = read_u64_payload(sub.data)?;
                if self.boot_count > 0 && self.boot_count != i {
                    return Err(WinLogError::ConflictingCounter(
                        "boot counter",
                        i,
                        self.boot_count,
                    ));
                }
                self.boot_count = i;
                Ok(())
            }
            EVENT_COUNTER => {
                let i = read_u64_payload(sub.data)?;
                if self.event_count > 0 && self.event_count != i {
                    return Err(WinLogError::ConflictingCounter(
                        "event counter",
                        i,
                        self.event_count,
                    ));
                }
                self.event_count = i;
                Ok(())
            }
            COUNTER_ID => {
                let i = read_u64_payload(sub.data)?;
                if self.event_counter_id > 0 && self.event_counter_id != i {
                    return Err(WinLogError::ConflictingCounter(
                        "event counter id",
                        i,
                        self.event_counter_id,
                    ));
                }
                self.event_counter_id = i;
                Ok(())
            }
            BITLOCKER_UNLOCK => {
                if sub.data.len() > 8 {
                    return Err(WinLogError::BitlockerTooLarge(
                        sub.data.len() as u32,
                    ));
                }
                let i = read_uvarint(sub.data)?;
                // The status is duplicated on PCR 13; prefer the earlier
                // record.
                if pcr != 13 {
                    self.bitlocker_unlocks.push(i as BitlockerStatus);
                }
                Ok(())
            }
            TRANSFER_CONTROL => {
                // Value 1 means bootmgr launched winload; other values are
                // seen when winresume is launched.
                let i = read_u32_payload(sub.data)?;
                self.cold_boot = i == 0x1;
                Ok(())
            }
            // Latch on when ever true: weaker security state when set.
            OS_KERNEL_DEBUG | BOOT_DEBUGGING | TEST_SIGNING => {
                if sub.data.len() != 1 {
                    return Err(WinLogError::PayloadSize {
                        want: 1,
                        got: sub.data.len() as u32,
                    });
                }
                let is_set = sub.data[0] != 0;
                match sub.typ {
                    OS_KERNEL_DEBUG => {
                        self.kernel_debug_enabled |= is_set
                    }
                    BOOT_DEBUGGING => {
                        self.boot_debugging_enabled |= is_set
                    }
                    _ => self.test_signing_enabled |= is_set,
                }
                Ok(())
            }
            // Latch off when ever false: stronger security state when set.
            CODE_INTEGRITY => {
                if sub.data.len() != 1 {
                    return Err(WinLogError::PayloadSize {
                        want: 1,
                        got: sub.data.len() as u32,
                    });
                }
                let is_set = sub.data[0] != 0;
                if is_set && self.code_integrity_enabled == Ternary::Unknown
                {
                    self.code_integrity_enabled = Ternary::True;
                } else if !is_set {
                    self.code_integrity_enabled = Ternary::False;
                }
                Ok(())
            }
            DATA_EXECUTION_PREVENTION => {
                let is_set = read_u64_payload(sub.data)? != 0;
                if is_set && self.dep_enabled == Ternary::Unknown {
                    self.dep_enabled = Ternary::True;
                } else if !is_set {
                    self.dep_enabled = Ternary::False;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn read_loaded_module_aggregation(
        &mut self,
        data: &[u8],
    ) -> Result<(), WinLogError> {
        let mut module = WinModuleLoad::default();
        let mut cur = Cursor::new(data);
        while (cur.position() as usize) < data.len() {
            let sub = read_sub_event(&mut cur)?;
            match sub.typ {
                IMAGE_BASE => {
                    if !module.image_base.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "image base",
                        ));
                    }
                    let base = read_u64_payload(sub.data)?;
                    if base != 0 {
                        module.image_base.push(base);
                    }
                }
                AUTHENTICODE_HASH => {
                    if !module.authenticode_hash.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "authenticode hash",
                        ));
                    }
                    if sub.data.len() > 32 {
                        return Err(WinLogError::PayloadSize {
                            want: 32,
                            got: sub.data.len() as u32,
                        });
                    }
                    module.authenticode_hash = sub.data.to_vec();
                }
                FILE_PATH => {
                    if !module.file_path.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "file path",
                        ));
                    }
                    module.file_path = parse_utf16(sub.data);
                }
                IMAGE_SIZE => {
                    if module.image_size != 0 {
                        return Err(WinLogError::DuplicateField(
                            "image size",
                        ));
                    }
                    module.image_size = read_u64_payload(sub.data)?;
                }
                HASH_ALGORITHM_ID => {
                    if module.hash_algorithm != WinCspAlg::Unknown {
                        return Err(WinLogError::DuplicateField(
                            "hash algorithm ID",
                        ));
                    }
                    let id = read_u32_payload(sub.data)?;
                    module.hash_algorithm = WinCspAlg::from_id(id)
                        .ok_or(WinLogError::UnknownAlgorithm(id))?;
                }
                IMAGE_VALIDATED => {
                    if module.image_validated {
                        return Err(WinLogError::DuplicateField(
                            "image validated",
                        ));
                    }
                    if sub.data.len() != 1 {
                        return Err(WinLogError::PayloadSize {
                            want: 1,
                            got: sub.data.len() as u32,
                        });
                    }
                    module.image_validated = sub.data[0] == 1;
                }
                AUTHORITY_ISSUER => {
                    if !module.authority_issuer.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "authority issuer",
                        ));
                    }
                    module.authority_issuer = parse_utf16(sub.data);
                }
                AUTHORITY_PUBLISHER => {
                    if !module.authority_publisher.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "authority publisher",
                        ));
                    }
                    module.authority_publisher = parse_utf16(sub.data);
                }
                AUTHORITY_SERIAL => {
                    if !module.authority_serial.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "authority serial",
                        ));
                    }
                    if sub.data.len() > 128 {
                        return Err(WinLogError::PayloadSize {
                            want: 128,
                            got: sub.data.len() as u32,
                        });
                    }
                    module.authority_serial = sub.data.to_vec();
                }
                AUTHORITY_SHA1_THUMBPRINT => {
                    if !module.authority_sha1.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "authority SHA1 thumbprint",
                        ));
                    }
                    if sub.data.len() > 20 {
                        return Err(WinLogError::PayloadSize {
                            want: 20,
                            got: sub.data.len() as u32,
                        });
                    }
                    module.authority_sha1 = sub.data.to_vec();
                }
                MODULE_SVN => {} // consume without storing
                other => {
                    return Err(WinLogError::UnknownAggregationEvent(other))
                }
            }
        }

        let key = hex::encode(&module.authenticode_hash);
        if let Some(previous) = self.loaded_modules.get(&key) {
            module.image_base.extend_from_slice(&previous.image_base);
        }
        self.loaded_modules.insert(key, module);
        Ok(())
    }

    fn read_elam_aggregation(
        &mut self,
        data: &[u8],
    ) -> Result<(), WinLogError> {
        let mut driver_name = String::new();
        let mut elam = WinElam::default();
        let mut cur = Cursor::new(data);
        while (cur.position() as usize) < data.len() {
            let sub = read_sub_event(&mut cur)?;
            match sub.typ {
                ELAM_KEYNAME => {
                    if !driver_name.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "driver name",
                        ));
                    }
                    driver_name = parse_utf16(sub.data);
                }
                ELAM_MEASURED => {
                    if !elam.measured.is_empty() {
                        return Err(WinLogError::DuplicateField("measured"));
                    }
                    elam.measured = sub.data.to_vec();
                }
                ELAM_POLICY => {
                    if !elam.policy.is_empty() {
                        return Err(WinLogError::DuplicateField("policy"));
                    }
                    elam.policy = sub.data.to_vec();
                }
                ELAM_CONFIGURATION => {
                    if !elam.config.is_empty() {
                        return Err(WinLogError::DuplicateField("config"));
                    }
                    elam.config = sub.data.to_vec();
                }
                other => {
                    return Err(WinLogError::UnknownAggregationEvent(other))
                }
            }
        }
        if driver_name.is_empty() {
            return Err(WinLogError::MissingDriverName);
        }
        self.elam.insert(driver_name, elam);
        Ok(())
    }

    fn read_inner_trust_point(
        &mut self,
        data: &[u8],
    ) -> Result<(), WinLogError> {
        let mut aik_name = String::new();
        let mut quote = WinWbclQuote::default();
        let mut cur = Cursor::new(data);
        while (cur.position() as usize) < data.len() {
            let sub = read_sub_event(&mut cur)?;
            match sub.typ {
                AIK_ID => {
                    if !aik_name.is_empty() {
                        return Err(WinLogError::DuplicateField("AIK id"));
                    }
                    aik_name = parse_utf16(sub.data);
                }
                AIK_PUB_DIGEST => {
                    if !quote.aik_pub_digest.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "AIK public digest",
                        ));
                    }
                    quote.aik_pub_digest = sub.data.to_vec();
                }
                QUOTE => {
                    if !quote.quote.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "quote blob",
                        ));
                    }
                    quote.quote = sub.data.to_vec();
                }
                QUOTE_SIGNATURE => {
                    if !quote.quote_signature.is_empty() {
                        return Err(WinLogError::DuplicateField(
                            "quote signature",
                        ));
                    }
                    quote.quote_signature = sub.data.to_vec();
                }
                other => {
                    return Err(WinLogError::UnknownAggregationEvent(other))
                }
            }
        }
        if aik_name.is_empty() {
            return Err(WinLogError::MissingAikId);
        }
        self.trust_point_quote.insert(aik_name, quote);
        Ok(())
    }

    fn read_outer_trust_point(
        &mut self,
        tagged: &crate::eventlog::efi::TaggedEventData,
    ) -> Result<(), WinLogError> {
        let mut cur = Cursor::new(tagged.data.as_slice());
        while (cur.position() as usize) < tagged.data.len() {
            let sub = read_sub_event(&mut cur)?;
            if sub.typ == TRUSTPOINT_AGGREGATION {
                // An array of quotes.
                self.read_inner_trust_point(sub.data)?;
            } else {
                // A single bare quote.
                return self.read_inner_trust_point(&tagged.data);
            }
        }
        Ok(())
    }
}

/// Decodes a Microsoft tagged event payload, including the enclosing
/// {id, size} header, into the generic sub-event list. Containers are
/// flattened recursively.
pub fn parse_microsoft_event(
    b: &[u8],
) -> Result<Vec<MicrosoftEvent>, WinLogError> {
    let mut events = Vec::new();
    let mut cur = Cursor::new(b);
    while (cur.position() as usize) < b.len() {
        let sub = read_sub_event(&mut cur)?;
        if sub.typ & SIPA_TYPE_MASK == SIPA_CONTAINER {
            events.extend(parse_microsoft_event(sub.data)?);
            continue;
        }
        match sub.typ {
            FILE_PATH | AUTHORITY_ISSUER | AUTHORITY_PUBLISHER
            | SYSTEM_ROOT | ELAM_KEYNAME => {
                events.push(MicrosoftEvent::String {
                    typ: sub.typ,
                    message: parse_utf16(sub.data),
                });
            }
            BOOT_REVOCATION_LIST => {
                let mut rev = Cursor::new(sub.data);
                let creation_time = rev.read_u64::<LittleEndian>()?;
                let digest_len = rev.read_u32::<LittleEndian>()?;
                let hash_algorithm = rev.read_u32::<LittleEndian>()?;
                let remaining = sub
                    .data
                    .len()
                    .saturating_sub(rev.position() as usize);
                if digest_len as usize > remaining {
                    return Err(WinLogError::SubEventTooLarge(
                        digest_len, remaining,
                    ));
                }
                let mut digest = vec![0u8; digest_len as usize];
                rev.read_exact(&mut digest)?;
                events.push(MicrosoftEvent::Revocation {
                    typ: sub.typ,
                    creation_time,
                    hash_algorithm,
                    digest,
                });
            }
            _ => events.push(MicrosoftEvent::Data {
                typ: sub.typ,
                data: sub.data.to_vec(),
            }),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventlog::HashAlg;
    use byteorder::WriteBytesExt;

    fn sub_event(typ: u32, data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(typ).unwrap(); //#[allow_ci]
        b.write_u32::<LittleEndian>(data.len() as u32).unwrap(); //#[allow_ci]
        b.extend_from_slice(data);
        b
    }

    fn tagged_event(pcr: u32, container_id: u32, body: &[u8]) -> Event {
        let mut data = Vec::new();
        data.write_u32::<LittleEndian>(container_id).unwrap(); //#[allow_ci]
        data.write_u32::<LittleEndian>(body.len() as u32).unwrap(); //#[allow_ci]
        data.extend_from_slice(body);
        Event {
            sequence: 0,
            index: pcr,
            typ: EventType::EventTag,
            digest: HashAlg::Sha256.hash(&data).unwrap(), //#[allow_ci]
            alg: HashAlg::Sha256,
            data,
        }
    }

    #[test]
    fn boot_counter_and_latches() {
        let mut body = Vec::new();
        body.extend_from_slice(&sub_event(
            BOOT_COUNTER,
            &42u64.to_le_bytes(),
        ));
        body.extend_from_slice(&sub_event(OS_KERNEL_DEBUG, &[1]));
        body.extend_from_slice(&sub_event(CODE_INTEGRITY, &[1]));
        body.extend_from_slice(&sub_event(
            DATA_EXECUTION_PREVENTION,
            &1u64.to_le_bytes(),
        ));
        let events = [tagged_event(12, SIPA_CONTAINER, &body)];

        let win = parse_win_events(&events).unwrap(); //#[allow_ci]
        assert_eq!(win.boot_count, 42);
        assert!(win.kernel_debug_enabled);
        assert_eq!(win.code_integrity_enabled, Ternary::True);
        assert_eq!(win.dep_enabled, Ternary::True);
    }

    #[test]
    fn insecure_latch_sticks() {
        let mut body = Vec::new();
        body.extend_from_slice(&sub_event(CODE_INTEGRITY, &[0]));
        body.extend_from_slice(&sub_event(CODE_INTEGRITY, &[1]));
        let events = [tagged_event(12, SIPA_CONTAINER, &body)];
        let win = parse_win_events(&events).unwrap(); //#[allow_ci]
        // Once observed disabled, a later enable does not clear it.
        assert_eq!(win.code_integrity_enabled, Ternary::False);
    }

    #[test]
    fn loaded_module_aggregation() {
        let hash = [0x11u8; 32];
        let mut lma = Vec::new();
        let path: Vec<u8> = "\\Windows\\system32\\winload.efi\u{0}"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        lma.extend_from_slice(&sub_event(FILE_PATH, &path));
        lma.extend_from_slice(&sub_event(AUTHENTICODE_HASH, &hash));
        lma.extend_from_slice(&sub_event(
            IMAGE_BASE,
            &0x7000_0000u64.to_le_bytes(),
        ));
        lma.extend_from_slice(&sub_event(
            HASH_ALGORITHM_ID,
            &0x0cu32.to_le_bytes(),
        ));
        let body = sub_event(LOADED_MODULE_AGGREGATION, &lma);
        let events = [tagged_event(12, SIPA_CONTAINER, &body)];

        let win = parse_win_events(&events).unwrap(); //#[allow_ci]
        let module = &win.loaded_modules[&hex::encode(hash)];
        assert_eq!(module.file_path, "\\Windows\\system32\\winload.efi");
        assert_eq!(module.image_base, vec![0x7000_0000]);
        assert_eq!(module.hash_algorithm, WinCspAlg::Sha256);
    }

    #[test]
    fn elam_aggregation() {
        let name: Vec<u8> = "WdBoot\u{0}"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        let mut agg = Vec::new();
        agg.extend_from_slice(&sub_event(ELAM_KEYNAME, &name));
        agg.extend_from_slice(&sub_event(ELAM_MEASURED, &[0xAA; 32]));
        let body = sub_event(ELAM_AGGREGATION, &agg);
        let events = [tagged_event(13, SIPA_CONTAINER, &body)];

        let win = parse_win_events(&events).unwrap(); //#[allow_ci]
        assert_eq!(win.elam["WdBoot"].measured, vec![0xAA; 32]);
    }

    #[test]
    fn events_after_separator_ignored() {
        let sep_data = b"WBCL".to_vec();
        let separator = Event {
            sequence: 0,
            index: 12,
            typ: EventType::Separator,
            digest: HashAlg::Sha256.hash(&sep_data).unwrap(), //#[allow_ci]
            alg: HashAlg::Sha256,
            data: sep_data,
        };
        let mut late = tagged_event(
            12,
            SIPA_CONTAINER,
            &sub_event(BOOT_COUNTER, &9u64.to_le_bytes()),
        );
        late.sequence = 1;
        let win = parse_win_events(&[separator, late]).unwrap(); //#[allow_ci]
        assert_eq!(win.boot_count, 0);
    }

    #[test]
    fn tampered_tagged_event_rejected() {
        let mut event = tagged_event(
            12,
            SIPA_CONTAINER,
            &sub_event(BOOT_COUNTER, &9u64.to_le_bytes()),
        );
        event.data[8] ^= 0x01;
        assert!(matches!(
            parse_win_events(&[event]),
            Err(WinLogError::DigestMismatch(0, 12))
        ));
    }

    #[test]
    fn unknown_sipa_events_skipped() {
        let mut body = Vec::new();
        body.extend_from_slice(&sub_event(0x0002_0001, b"some info"));
        body.extend_from_slice(&sub_event(
            BOOT_COUNTER,
            &7u64.to_le_bytes(),
        ));
        let events = [tagged_event(12, SIPA_CONTAINER, &body)];
        let win = parse_win_events(&events).unwrap(); //#[allow_ci]
        assert_eq!(win.boot_count, 7);
    }

    #[test]
    fn microsoft_event_container_flattens() {
        let path: Vec<u8> = "C:\\Windows\u{0}"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        let inner = sub_event(SYSTEM_ROOT, &path);
        let outer = sub_event(SIPA_CONTAINER | 1, &inner);
        let events = parse_microsoft_event(&outer).unwrap(); //#[allow_ci]
        match &events[0] {
            MicrosoftEvent::String { typ, message } => {
                assert_eq!(*typ, SYSTEM_ROOT);
                assert_eq!(message, "C:\\Windows");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn oversized_sub_event_rejected() {
        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(BOOT_COUNTER).unwrap(); //#[allow_ci]
        body.write_u32::<LittleEndian>(0xFFFF).unwrap(); //#[allow_ci]
        body.extend_from_slice(&[0u8; 4]);
        let events = [tagged_event(12, SIPA_CONTAINER, &body)];
        assert!(parse_win_events(&events).is_err());
    }
}
