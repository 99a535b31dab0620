// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! UEFI on-disk structures referenced by event payloads: GUIDs, variable
//! data, signature lists and the GPT header. Layouts follow the UEFI
//! specification sections cited on each type.

use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use openssl::hash::{hash, MessageDigest};
use openssl::x509::X509;
use thiserror::Error;

/// Maximum accepted byte length for a variable name field. Larger than any
/// reasonable value.
pub const EFI_MAX_NAME_LEN: u64 = 2048;
/// Maximum accepted size in bytes of a variable data field.
pub const EFI_MAX_DATA_LEN: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum EfiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unicode name too long: {0} > {EFI_MAX_NAME_LEN}")]
    NameTooLong(u64),
    #[error("variable data too long: {0} > {EFI_MAX_DATA_LEN}")]
    DataTooLong(u64),
    #[error("signature header too large: {0}")]
    SignatureHeaderTooLarge(u32),
    #[error("signature list too large: {0}")]
    SignatureListTooLarge(u32),
    #[error("unhandled signature type {0}")]
    UnhandledSignatureType(EfiGuid),
    #[error("signature buffer smaller than header ({0} < 16)")]
    SignatureTooShort(usize),
    #[error("malformed partition table: {0} partition bytes declared, {1} present")]
    MalformedPartitionTable(u64, usize),
    #[error("malformed device path")]
    MalformedDevicePath,
    #[error("malformed boot variable")]
    MalformedBootVariable,
    #[error("tagged event length {0} larger than payload {1}")]
    TaggedEventTooLong(u32, usize),
    #[error("invalid string data")]
    InvalidStringData,
    #[error("certificate parse error: {0}")]
    Certificate(#[from] openssl::error::ErrorStack),
    #[error("certificate structure error: {0}")]
    CertificateStructure(#[from] picky_asn1_der::Asn1DerError),
}

/// The EFI_GUID type, stored in the mixed-endian on-disk layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EfiGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl EfiGuid {
    pub const fn new(
        data1: u32,
        data2: u16,
        data3: u16,
        data4: [u8; 8],
    ) -> EfiGuid {
        EfiGuid {
            data1,
            data2,
            data3,
            data4,
        }
    }

    pub fn to_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.data1.to_le_bytes());
        out[4..6].copy_from_slice(&self.data2.to_le_bytes());
        out[6..8].copy_from_slice(&self.data3.to_le_bytes());
        out[8..].copy_from_slice(&self.data4);
        out
    }

    pub fn parse(cur: &mut Cursor<&[u8]>) -> Result<EfiGuid, EfiError> {
        let data1 = cur.read_u32::<LittleEndian>()?;
        let data2 = cur.read_u16::<LittleEndian>()?;
        let data3 = cur.read_u16::<LittleEndian>()?;
        let mut data4 = [0u8; 8];
        cur.read_exact(&mut data4)?;
        Ok(EfiGuid {
            data1,
            data2,
            data3,
            data4,
        })
    }
}

impl fmt::Display for EfiGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

// GUIDs identifying the contents of an UEFI_SIGNATURE_LIST.
pub const CERT_X509_SIG_GUID: EfiGuid = EfiGuid::new(
    0xa5c059a1,
    0x94e4,
    0x4aa7,
    [0x87, 0xb5, 0xab, 0x15, 0x5c, 0x2b, 0xf0, 0x72],
);
pub const HASH_SHA256_SIG_GUID: EfiGuid = EfiGuid::new(
    0xc1c41626,
    0x504c,
    0x4092,
    [0xac, 0xa9, 0x41, 0xf9, 0x36, 0x93, 0x43, 0x28],
);

// Well-known variable owner GUIDs.
pub const EFI_GLOBAL_VARIABLE: EfiGuid = EfiGuid::new(
    0x8be4df61,
    0x93ca,
    0x11d2,
    [0xaa, 0x0d, 0x00, 0xe0, 0x98, 0x03, 0x2b, 0x8c],
);
pub const EFI_IMAGE_SECURITY_DATABASE: EfiGuid = EfiGuid::new(
    0xd719b2cb,
    0x3d3a,
    0x4596,
    [0xa3, 0xbc, 0xda, 0xd0, 0x0e, 0x67, 0x65, 0x6f],
);

// GUID used by the shim bootloader for its own variables.
pub const SHIM_LOCK_GUID: EfiGuid = EfiGuid::new(
    0x605dab50,
    0xe046,
    0x4300,
    [0xab, 0xb6, 0x3d, 0xd8, 0x10, 0xdd, 0x8b, 0x23],
);

/// The UEFI_VARIABLE_DATA structure logged for variable measurements.
#[derive(Debug, Clone)]
pub struct UefiVariableData {
    pub guid: EfiGuid,
    pub unicode_name: Vec<u16>,
    pub data: Vec<u8>,
}

impl UefiVariableData {
    pub fn parse(
        cur: &mut Cursor<&[u8]>,
    ) -> Result<UefiVariableData, EfiError> {
        let guid = EfiGuid::parse(cur)?;
        let name_len = cur.read_u64::<LittleEndian>()?;
        let data_len = cur.read_u64::<LittleEndian>()?;
        if name_len > EFI_MAX_NAME_LEN {
            return Err(EfiError::NameTooLong(name_len));
        }
        if data_len > EFI_MAX_DATA_LEN {
            return Err(EfiError::DataTooLong(data_len));
        }
        let mut unicode_name = Vec::with_capacity(name_len as usize);
        for _ in 0..name_len {
            unicode_name.push(cur.read_u16::<LittleEndian>()?);
        }
        let mut data = vec![0u8; data_len as usize];
        cur.read_exact(&mut data)?;
        Ok(UefiVariableData {
            guid,
            unicode_name,
            data,
        })
    }

    pub fn name(&self) -> String {
        String::from_utf16_lossy(&self.unicode_name)
    }

    /// Decodes the variable data as an EFI_SIGNATURE_LIST.
    pub fn signature_data(
        &self,
    ) -> Result<(Vec<X509>, Vec<Vec<u8>>), EfiError> {
        parse_signature_list(&self.data)
    }
}

/// Parses a chain of EFI_SIGNATURE_LIST structures into the X.509
/// certificates and raw hashes they carry.
pub fn parse_signature_list(
    b: &[u8],
) -> Result<(Vec<X509>, Vec<Vec<u8>>), EfiError> {
    // An empty signature list is valid.
    if b.len() < 28 {
        return Ok((Vec::new(), Vec::new()));
    }
    let mut certificates = Vec::new();
    let mut hashes = Vec::new();
    let mut cur = Cursor::new(b);

    while (cur.position() as usize) < b.len() {
        let signature_type = EfiGuid::parse(&mut cur)?;
        let list_size = cur.read_u32::<LittleEndian>()?;
        let header_size = cur.read_u32::<LittleEndian>()?;
        let signature_size = cur.read_u32::<LittleEndian>()?;
        if header_size as u64 > EFI_MAX_DATA_LEN {
            return Err(EfiError::SignatureHeaderTooLarge(header_size));
        }
        if list_size as u64 > EFI_MAX_DATA_LEN || list_size < 28 {
            return Err(EfiError::SignatureListTooLarge(list_size));
        }
        if signature_size < 16 {
            return Err(EfiError::SignatureTooShort(signature_size as usize));
        }

        match signature_type {
            CERT_X509_SIG_GUID => {
                let mut offset = 0u32;
                while offset < list_size - 28 {
                    let _owner = EfiGuid::parse(&mut cur)?;
                    let mut der = vec![0u8; signature_size as usize - 16];
                    cur.read_exact(&mut der)?;
                    certificates.push(X509::from_der(&der)?);
                    offset += signature_size;
                }
            }
            HASH_SHA256_SIG_GUID => {
                let mut offset = 0u32;
                while offset < list_size - 28 {
                    let _owner = EfiGuid::parse(&mut cur)?;
                    let mut digest = vec![0u8; signature_size as usize - 16];
                    cur.read_exact(&mut digest)?;
                    hashes.push(digest);
                    offset += signature_size;
                }
            }
            other => return Err(EfiError::UnhandledSignatureType(other)),
        }
    }
    Ok((certificates, hashes))
}

/// Parses a single EFI_SIGNATURE_DATA entry as logged by authority events.
///
/// A bug in shim may drop the leading SignatureOwner GUID; when the buffer
/// only parses as a bare certificate, the returned flag is set.
pub fn parse_signature(b: &[u8]) -> Result<(X509, bool), EfiError> {
    if b.len() < 16 {
        return Err(EfiError::SignatureTooShort(b.len()));
    }
    match X509::from_der(&b[16..]) {
        Ok(cert) => Ok((cert, false)),
        Err(err) => match X509::from_der(b) {
            Ok(cert) => Ok((cert, true)),
            Err(_) => Err(EfiError::Certificate(err)),
        },
    }
}

/// SHA-256 over the DER-encoded TBSCertificate. This is the fingerprint
/// format baselines pin certificates by, stable across re-signing.
pub fn tbs_fingerprint(der: &[u8]) -> Result<[u8; 32], EfiError> {
    let cert: picky_asn1_x509::Certificate =
        picky_asn1_der::from_bytes(der)?;
    let tbs = picky_asn1_der::to_vec(&cert.tbs_certificate)?;
    let digest = hash(MessageDigest::sha256(), &tbs)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}

/// The GPT header, UEFI spec section 5.3.2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiPartitionTableHeader {
    pub signature: u64,
    pub revision: u32,
    pub header_size: u32,
    pub crc32: u32,
    pub my_lba: u64,
    pub alternate_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: EfiGuid,
    pub partition_entry_lba: u64,
    pub number_of_partition_entries: u32,
    pub size_of_partition_entry: u32,
    pub partition_entry_array_crc32: u32,
}

impl EfiPartitionTableHeader {
    pub fn parse(
        cur: &mut Cursor<&[u8]>,
    ) -> Result<EfiPartitionTableHeader, EfiError> {
        let signature = cur.read_u64::<LittleEndian>()?;
        let revision = cur.read_u32::<LittleEndian>()?;
        let header_size = cur.read_u32::<LittleEndian>()?;
        let crc32 = cur.read_u32::<LittleEndian>()?;
        let _reserved = cur.read_u32::<LittleEndian>()?;
        let my_lba = cur.read_u64::<LittleEndian>()?;
        let alternate_lba = cur.read_u64::<LittleEndian>()?;
        let first_usable_lba = cur.read_u64::<LittleEndian>()?;
        let last_usable_lba = cur.read_u64::<LittleEndian>()?;
        let disk_guid = EfiGuid::parse(cur)?;
        let partition_entry_lba = cur.read_u64::<LittleEndian>()?;
        let number_of_partition_entries = cur.read_u32::<LittleEndian>()?;
        let size_of_partition_entry = cur.read_u32::<LittleEndian>()?;
        let partition_entry_array_crc32 = cur.read_u32::<LittleEndian>()?;
        Ok(EfiPartitionTableHeader {
            signature,
            revision,
            header_size,
            crc32,
            my_lba,
            alternate_lba,
            first_usable_lba,
            last_usable_lba,
            disk_guid,
            partition_entry_lba,
            number_of_partition_entries,
            size_of_partition_entry,
            partition_entry_array_crc32,
        })
    }
}

/// A GPT partition entry, UEFI spec section 5.3.3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiPartition {
    pub type_guid: EfiGuid,
    pub partition_guid: EfiGuid,
    pub first_lba: u64,
    pub last_lba: u64,
    pub attribute_flags: u64,
    pub partition_name: [u16; 36],
}

impl EfiPartition {
    pub fn parse(cur: &mut Cursor<&[u8]>) -> Result<EfiPartition, EfiError> {
        let type_guid = EfiGuid::parse(cur)?;
        let partition_guid = EfiGuid::parse(cur)?;
        let first_lba = cur.read_u64::<LittleEndian>()?;
        let last_lba = cur.read_u64::<LittleEndian>()?;
        let attribute_flags = cur.read_u64::<LittleEndian>()?;
        let mut partition_name = [0u16; 36];
        for slot in partition_name.iter_mut() {
            *slot = cur.read_u16::<LittleEndian>()?;
        }
        Ok(EfiPartition {
            type_guid,
            partition_guid,
            first_lba,
            last_lba,
            attribute_flags,
            partition_name,
        })
    }

    pub fn name(&self) -> String {
        let end = self
            .partition_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(self.partition_name.len());
        String::from_utf16_lossy(&self.partition_name[..end])
    }
}

/// An EFI_CONFIGURATION_TABLE entry, UEFI spec section 4.6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiConfigurationTable {
    pub vendor_guid: EfiGuid,
    pub vendor_table: u64,
}

/// A TCG_PCClientTaggedEventStruct payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEventData {
    pub id: u32,
    pub data: Vec<u8>,
}

impl TaggedEventData {
    pub fn parse(d: &[u8]) -> Result<TaggedEventData, EfiError> {
        let mut cur = Cursor::new(d);
        let id = cur.read_u32::<LittleEndian>()?;
        let data_len = cur.read_u32::<LittleEndian>()?;
        if data_len as usize > d.len() {
            return Err(EfiError::TaggedEventTooLong(data_len, d.len()));
        }
        let mut data = vec![0u8; data_len as usize];
        cur.read_exact(&mut data)?;
        Ok(TaggedEventData { id, data })
    }
}

/// Decodes event payload strings, which are either UCS-2 or raw bytes.
pub fn parse_string_data(b: &[u8]) -> Result<String, EfiError> {
    if b.len() % 2 == 0 && !b.is_empty() {
        let mut wide = Vec::with_capacity(b.len() / 2);
        let mut is_ucs2 = true;
        for pair in b.chunks_exact(2) {
            if pair[1] != 0x00 {
                is_ucs2 = false;
                break;
            }
            wide.push(u16::from_le_bytes([pair[0], pair[1]]));
        }
        if is_ucs2 {
            return Ok(String::from_utf16_lossy(&wide));
        }
    }
    std::str::from_utf8(b)
        .map(str::to_owned)
        .map_err(|_| EfiError::InvalidStringData)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    #[test]
    fn guid_display() {
        let guid = EfiGuid::new(
            0xec87d643,
            0xeba4,
            0x4bb5,
            [0xa1, 0xe5, 0x3f, 0x3e, 0x36, 0xb2, 0x0d, 0xa9],
        );
        assert_eq!(
            guid.to_string(),
            "ec87d643-eba4-4bb5-a1e5-3f3e36b20da9"
        );
    }

    fn variable_bytes(guid: EfiGuid, name: &str, data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(guid.data1).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(guid.data2).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(guid.data3).unwrap(); //#[allow_ci]
        b.extend_from_slice(&guid.data4);
        b.write_u64::<LittleEndian>(name.len() as u64).unwrap(); //#[allow_ci]
        b.write_u64::<LittleEndian>(data.len() as u64).unwrap(); //#[allow_ci]
        for c in name.encode_utf16() {
            b.write_u16::<LittleEndian>(c).unwrap(); //#[allow_ci]
        }
        b.extend_from_slice(data);
        b
    }

    #[test]
    fn parse_variable_data() {
        let raw =
            variable_bytes(EFI_GLOBAL_VARIABLE, "SecureBoot", &[0x01]);
        let mut cur = Cursor::new(raw.as_slice());
        let var = UefiVariableData::parse(&mut cur).unwrap(); //#[allow_ci]
        assert_eq!(var.guid, EFI_GLOBAL_VARIABLE);
        assert_eq!(var.name(), "SecureBoot");
        assert_eq!(var.data, vec![0x01]);
    }

    #[test]
    fn reject_oversized_variable_name() {
        let mut b = Vec::new();
        b.extend_from_slice(&[0u8; 16]);
        b.write_u64::<LittleEndian>(EFI_MAX_NAME_LEN + 1).unwrap(); //#[allow_ci]
        b.write_u64::<LittleEndian>(0).unwrap(); //#[allow_ci]
        let mut cur = Cursor::new(b.as_slice());
        assert!(matches!(
            UefiVariableData::parse(&mut cur),
            Err(EfiError::NameTooLong(_))
        ));
    }

    #[test]
    fn parse_sha256_signature_list() {
        let digest = [0xABu8; 32];
        let mut b = Vec::new();
        b.write_u32::<LittleEndian>(HASH_SHA256_SIG_GUID.data1).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(HASH_SHA256_SIG_GUID.data2).unwrap(); //#[allow_ci]
        b.write_u16::<LittleEndian>(HASH_SHA256_SIG_GUID.data3).unwrap(); //#[allow_ci]
        b.extend_from_slice(&HASH_SHA256_SIG_GUID.data4);
        b.write_u32::<LittleEndian>(28 + 48).unwrap(); // list size //#[allow_ci]
        b.write_u32::<LittleEndian>(0).unwrap(); // header size //#[allow_ci]
        b.write_u32::<LittleEndian>(48).unwrap(); // signature size //#[allow_ci]
        b.extend_from_slice(&[0u8; 16]); // owner GUID
        b.extend_from_slice(&digest);

        let (certs, hashes) = parse_signature_list(&b).unwrap(); //#[allow_ci]
        assert!(certs.is_empty());
        assert_eq!(hashes, vec![digest.to_vec()]);
    }

    #[test]
    fn empty_signature_list_is_valid() {
        let (certs, hashes) = parse_signature_list(&[]).unwrap(); //#[allow_ci]
        assert!(certs.is_empty());
        assert!(hashes.is_empty());
    }

    #[test]
    fn parse_string_data_both_encodings() {
        assert_eq!(parse_string_data(b"grub_cmd").unwrap(), "grub_cmd"); //#[allow_ci]
        let ucs2: Vec<u8> = "Setup"
            .encode_utf16()
            .flat_map(|c| c.to_le_bytes())
            .collect();
        assert_eq!(parse_string_data(&ucs2).unwrap(), "Setup"); //#[allow_ci]
    }
}
