// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Unpacks the compressed event log container evidence payloads carry: a
//! zstd frame holding one or more length-prefixed log buffers.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::EventLogError;

pub fn unpack_event_logs(packed: &[u8]) -> Result<Vec<Vec<u8>>, EventLogError> {
    let decompressed = zstd::stream::decode_all(Cursor::new(packed))?;

    let mut logs = Vec::new();
    let mut cur = Cursor::new(decompressed.as_slice());
    while (cur.position() as usize) < decompressed.len() {
        let len = cur.read_u32::<LittleEndian>()?;
        let remaining =
            decompressed.len().saturating_sub(cur.position() as usize);
        if len as usize > remaining {
            return Err(EventLogError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        let mut buf = vec![0u8; len as usize];
        cur.read_exact(&mut buf)?;
        logs.push(buf);
    }
    Ok(logs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn unpack_two_logs() {
        let mut plain = Vec::new();
        plain.write_u32::<LittleEndian>(3).unwrap(); //#[allow_ci]
        plain.extend_from_slice(b"abc");
        plain.write_u32::<LittleEndian>(2).unwrap(); //#[allow_ci]
        plain.extend_from_slice(b"xy");
        let packed = zstd::stream::encode_all(Cursor::new(plain), 0).unwrap(); //#[allow_ci]

        let logs = unpack_event_logs(&packed).unwrap(); //#[allow_ci]
        assert_eq!(logs, vec![b"abc".to_vec(), b"xy".to_vec()]);
    }

    #[test]
    fn reject_truncated_container() {
        let mut plain = Vec::new();
        plain.write_u32::<LittleEndian>(10).unwrap(); //#[allow_ci]
        plain.extend_from_slice(b"abc");
        let packed = zstd::stream::encode_all(Cursor::new(plain), 0).unwrap(); //#[allow_ci]
        assert!(unpack_event_logs(&packed).is_err());
    }
}
