// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Linux IMA runtime measurement log parsing and replay. The binary log
//! from securityfs carries one record per measured file: PCR index, SHA-1
//! template digest, template name and template data. The ima-ng, ima-sig
//! and ima-buf templates additionally carry the file digest, path and
//! signature.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

use super::HashAlg;

#[derive(Error, Debug)]
pub enum ImaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sized buffer past end of log: want {want}, got {got}")]
    Format { want: u32, got: usize },
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
    #[error(transparent)]
    Replay(#[from] ImaReplayError),
}

/// Replay failure carrying the computed PCR values, keyed by decimal PCR
/// index.
#[derive(Error, Debug)]
#[error("runtime measurement log does not match quoted PCRs")]
pub struct ImaReplayError {
    pub invalid_pcrs: HashMap<String, String>,
}

/// Fields specific to the ima-ng family of templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImaNgFields {
    pub algo: String,
    pub file_digest: Vec<u8>,
    pub path: String,
    pub signature: Vec<u8>,
}

/// One record of the binary runtime measurement log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImaEvent {
    pub sequence: usize,
    pub pcr: u32,
    /// SHA-1 template digest as extended into the PCR.
    pub digest: [u8; 20],
    /// Template name, e.g. "ima-ng" or "ima-sig".
    pub name: String,
    pub data: Vec<u8>,
    pub ng: Option<ImaNgFields>,
}

fn parse_sized_buffer(
    cur: &mut Cursor<&[u8]>,
    max_len: usize,
) -> Result<Vec<u8>, ImaError> {
    let sz = cur.read_u32::<LittleEndian>()?;
    if sz as usize >= max_len {
        return Err(ImaError::Format {
            want: sz,
            got: max_len,
        });
    }
    let mut buf = vec![0u8; sz as usize];
    cur.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_ng_fields(
    name: &str,
    data: &[u8],
) -> Result<ImaNgFields, ImaError> {
    let mut cur = Cursor::new(data);
    let mut fields = ImaNgFields::default();

    // d-ng: "<algo>:\0<digest>" behind a total length
    let sz = cur.read_u32::<LittleEndian>()?;
    if sz as usize >= data.len() {
        return Err(ImaError::Format {
            want: sz,
            got: data.len(),
        });
    }
    let mut algo = Vec::new();
    loop {
        let b = cur.read_u8()?;
        if b == 0 {
            break;
        }
        algo.push(b);
    }
    fields.algo = String::from_utf8_lossy(&algo).into_owned();
    let digest_len = (sz as usize)
        .checked_sub(fields.algo.len() + 1)
        .ok_or(ImaError::Format {
            want: sz,
            got: fields.algo.len() + 1,
        })?;
    fields.file_digest = vec![0u8; digest_len];
    cur.read_exact(&mut fields.file_digest)?;

    // n-ng
    let path = parse_sized_buffer(&mut cur, data.len())?;
    fields.path = String::from_utf8_lossy(&path)
        .trim_end_matches('\u{0}')
        .to_owned();

    // sig
    if name == "ima-sig" {
        fields.signature = parse_sized_buffer(&mut cur, data.len())?;
    }
    Ok(fields)
}

/// Parses the binary runtime measurement log. Records using the legacy
/// "ima" template are dropped; its fixed-size template data cannot be
/// told apart from the sized records that follow it.
pub fn parse_ima(measurements: &[u8]) -> Result<Vec<ImaEvent>, ImaError> {
    let mut events = Vec::new();
    let mut cur = Cursor::new(measurements);

    loop {
        let pcr = match cur.read_u32::<LittleEndian>() {
            Ok(pcr) => pcr,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(events)
            }
            Err(e) => return Err(e.into()),
        };

        let mut digest = [0u8; 20];
        cur.read_exact(&mut digest)?;

        let name_buf = parse_sized_buffer(&mut cur, measurements.len())?;
        let name = String::from_utf8_lossy(&name_buf).into_owned();
        if name == "ima" {
            continue;
        }

        let data = parse_sized_buffer(&mut cur, measurements.len())?;

        let ng = match name.as_str() {
            "ima-ng" | "ima-sig" | "ima-buf" => {
                Some(parse_ng_fields(&name, &data)?)
            }
            _ => None,
        };

        events.push(ImaEvent {
            sequence: events.len(),
            pcr,
            digest,
            name,
            data,
            ng,
        });
    }
}

/// Replays the runtime measurement log against the quoted PCR bank and
/// returns the verified log prefix.
///
/// There is a race between reading the log and quoting the PCRs: events
/// measured in between are in the log but not in the quote. The quote is
/// taken first, so the replay stops as soon as every touched PCR matches
/// the bank and the prefix up to that record is returned. An all-zero
/// SHA-1 template digest is extended as 0xFF bytes, mirroring what the
/// kernel does for files measured while open for writing.
pub fn verify_ima(
    events: &[ImaEvent],
    bank: &HashMap<String, String>,
    alg: HashAlg,
) -> Result<Vec<ImaEvent>, ImaError> {
    let sz = alg.digest_len();
    let zero = [0u8; 20];
    let mut fox = vec![0xFFu8; 20];
    fox.resize(sz, 0);

    let mut verified = Vec::new();
    let mut computed: HashMap<u32, Vec<u8>> = HashMap::new();

    'outer: for ev in events {
        let running = computed
            .get(&ev.pcr)
            .cloned()
            .unwrap_or_else(|| vec![0u8; sz]);
        let mut input = running;
        if ev.digest == zero {
            input.extend_from_slice(&fox);
        } else {
            input.extend_from_slice(&ev.digest);
            input.resize(sz + sz, 0);
        }
        computed.insert(ev.pcr, alg.hash(&input)?);

        verified.push(ev.clone());
        for (pcr, val) in &computed {
            match bank.get(&pcr.to_string()) {
                Some(quoted) if *quoted == hex::encode(val) => {}
                _ => continue 'outer,
            }
        }
        return Ok(verified);
    }

    Err(ImaReplayError {
        invalid_pcrs: computed
            .into_iter()
            .map(|(pcr, val)| (pcr.to_string(), hex::encode(val)))
            .collect(),
    }
    .into())
}
