// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Synthesizes a crypto-agile event log from a list of events. Only used to
//! build fixtures for replay tests; production code never writes logs.

use byteorder::{LittleEndian, WriteBytesExt};

use super::{Event, EventLogError, HashAlg, TPM_ALG_SHA1, TPM_ALG_SHA256};

pub fn marshal(
    alg: HashAlg,
    events: &[Event],
) -> Result<Vec<u8>, EventLogError> {
    let mut w = Vec::new();

    // Leading Spec ID event in legacy record format.
    w.write_u32::<LittleEndian>(0)?; // PCR index
    w.write_u32::<LittleEndian>(0x0000_0003)?; // EV_NO_ACTION
    w.extend_from_slice(&[0u8; 20]);
    w.write_u32::<LittleEndian>(0x25)?;
    w.extend_from_slice(b"Spec ID Event03\0");
    w.write_u32::<LittleEndian>(0)?; // platform class
    w.extend_from_slice(&[0, 2, 2, 2]); // minor, major, errata, uintn size
    w.write_u32::<LittleEndian>(2)?; // number of algorithms
    w.write_u16::<LittleEndian>(TPM_ALG_SHA1)?;
    w.write_u16::<LittleEndian>(20)?;
    w.write_u16::<LittleEndian>(TPM_ALG_SHA256)?;
    w.write_u16::<LittleEndian>(32)?;
    w.push(0); // vendor info size

    for event in events {
        w.write_u32::<LittleEndian>(event.index)?;
        w.write_u32::<LittleEndian>(event.typ as u32)?;
        w.write_u32::<LittleEndian>(1)?; // digest count
        w.write_u16::<LittleEndian>(alg.tpm_alg())?;
        w.extend_from_slice(&event.digest);
        w.write_u32::<LittleEndian>(event.data.len() as u32)?;
        w.extend_from_slice(&event.data);
    }

    Ok(w)
}
