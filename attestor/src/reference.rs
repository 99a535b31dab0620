// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Attestor Authors

//! Shared reference data the checks compare evidence against: the TPM
//! vendor endorsement CA pool, the published UEFI revocation lists per
//! architecture and the endorsement keys of known software TPMs.
//!
//! The handle is built explicitly by the embedding service and passed into
//! every engine run. Nothing here is loaded lazily or stored in globals, so
//! two runs with different reference data never observe each other.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use openssl::hash::{hash, MessageDigest};
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509};

use crate::eventlog::efi::{parse_signature_list, EfiError};

/// Instruction set architectures the official revocation list is published
/// for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbxArch {
    Amd64,
    X86,
    Arm64,
}

/// Immutable reference data for one engine run.
#[derive(Debug, Default)]
pub struct Reference {
    endorsement_roots: Vec<X509>,
    dbx: HashMap<DbxArch, HashSet<String>>,
    software_tpm_keys: HashSet<String>,
}

impl Reference {
    pub fn new() -> Reference {
        Reference::default()
    }

    /// Adds a vendor CA certificate to the endorsement pool.
    pub fn add_endorsement_root(&mut self, cert: X509) {
        self.endorsement_roots.push(cert);
    }

    /// Loads one architecture's official revocation list from the contents
    /// of an authenticated `dbx` variable update capsule: an
    /// EFI_VARIABLE_AUTHENTICATION_2 header followed by a signature list.
    pub fn load_dbx(
        &mut self,
        arch: DbxArch,
        raw: &[u8],
    ) -> Result<(), EfiError> {
        // EFI_TIME is 16 bytes; the WIN_CERTIFICATE dwLength that follows
        // covers the whole certificate structure including itself.
        let mut cur = Cursor::new(raw);
        cur.set_position(16);
        let cert_len = cur.read_u32::<LittleEndian>()?;
        let offset = 16usize
            .checked_add(cert_len as usize)
            .filter(|o| *o <= raw.len())
            .ok_or(EfiError::SignatureTooShort(raw.len()))?;

        let (_, hashes) = parse_signature_list(&raw[offset..])?;
        let set = self.dbx.entry(arch).or_default();
        for digest in hashes {
            set.insert(hex::encode(digest));
        }
        Ok(())
    }

    /// Adds revocation fingerprints directly, for callers that keep the
    /// list pre-parsed.
    pub fn add_dbx_fingerprints<I>(&mut self, arch: DbxArch, fprs: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.dbx.entry(arch).or_default().extend(fprs);
    }

    /// The official revocation fingerprints for one architecture, hex
    /// encoded. Empty when no list was loaded.
    pub fn dbx_fingerprints(&self, arch: DbxArch) -> Option<&HashSet<String>> {
        self.dbx.get(&arch)
    }

    /// Registers the endorsement public key of a software TPM, given as
    /// DER SubjectPublicKeyInfo.
    pub fn add_software_tpm_key(
        &mut self,
        spki_der: &[u8],
    ) -> Result<(), openssl::error::ErrorStack> {
        let digest = hash(MessageDigest::sha256(), spki_der)?;
        self.software_tpm_keys.insert(hex::encode(digest));
        Ok(())
    }

    /// True when the given endorsement public key belongs to a known
    /// software TPM.
    pub fn is_software_tpm_key(
        &self,
        spki_der: &[u8],
    ) -> Result<bool, openssl::error::ErrorStack> {
        let digest = hash(MessageDigest::sha256(), spki_der)?;
        Ok(self.software_tpm_keys.contains(&hex::encode(digest)))
    }

    /// Verifies an endorsement certificate against the vendor CA pool.
    /// Expired certificates are accepted; many platforms outlive their EK
    /// certificate validity.
    pub fn verify_endorsement(
        &self,
        cert: &X509,
    ) -> Result<bool, openssl::error::ErrorStack> {
        let mut builder = X509StoreBuilder::new()?;
        for root in &self.endorsement_roots {
            builder.add_cert(root.clone())?;
        }
        builder.set_flags(X509VerifyFlags::NO_CHECK_TIME)?;
        let store = builder.build();

        let chain = Stack::new()?;
        let mut ctx = X509StoreContext::new()?;
        ctx.init(&store, cert, &chain, |c| c.verify_cert())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use openssl::asn1::Asn1Time;
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    use crate::eventlog::efi::HASH_SHA256_SIG_GUID;

    fn self_signed(cn: &str) -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap(); //#[allow_ci]
        let mut name = X509NameBuilder::new().unwrap(); //#[allow_ci]
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap(); //#[allow_ci]
        let name = name.build();

        let mut builder = X509Builder::new().unwrap(); //#[allow_ci]
        builder.set_version(2).unwrap(); //#[allow_ci]
        builder.set_subject_name(&name).unwrap(); //#[allow_ci]
        builder.set_issuer_name(&name).unwrap(); //#[allow_ci]
        builder.set_pubkey(&key).unwrap(); //#[allow_ci]
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        builder
            .set_not_after(&Asn1Time::days_from_now(1).unwrap()) //#[allow_ci]
            .unwrap(); //#[allow_ci]
        builder.sign(&key, MessageDigest::sha256()).unwrap(); //#[allow_ci]
        (builder.build(), key)
    }

    fn dbx_capsule(digests: &[[u8; 32]]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[0u8; 16]); // EFI_TIME
        raw.write_u32::<LittleEndian>(8 + 16).unwrap(); //#[allow_ci]
        raw.extend_from_slice(&[0u8; 4]); // revision + cert type
        raw.extend_from_slice(&[0u8; 16]); // cert type GUID

        // EFI_SIGNATURE_LIST of SHA-256 hashes
        let guid = HASH_SHA256_SIG_GUID;
        let entries = digests.len() as u32;
        raw.extend_from_slice(&guid.to_bytes());
        raw.write_u32::<LittleEndian>(28 + entries * 48).unwrap(); //#[allow_ci]
        raw.write_u32::<LittleEndian>(0).unwrap(); //#[allow_ci]
        raw.write_u32::<LittleEndian>(48).unwrap(); //#[allow_ci]
        for digest in digests {
            raw.extend_from_slice(&[0u8; 16]); // owner
            raw.extend_from_slice(digest);
        }
        raw
    }

    #[test]
    fn dbx_capsule_yields_fingerprints() {
        let mut reference = Reference::new();
        reference
            .load_dbx(DbxArch::Amd64, &dbx_capsule(&[[0xAB; 32], [0xCD; 32]]))
            .unwrap(); //#[allow_ci]

        let fprs = reference.dbx_fingerprints(DbxArch::Amd64).unwrap(); //#[allow_ci]
        assert_eq!(fprs.len(), 2);
        assert!(fprs.contains(&"ab".repeat(32)));
        assert!(reference.dbx_fingerprints(DbxArch::X86).is_none());
    }

    #[test]
    fn self_signed_root_verifies_itself() {
        let (root, _) = self_signed("vendor root");
        let mut reference = Reference::new();
        reference.add_endorsement_root(root.clone());
        assert!(reference.verify_endorsement(&root).unwrap()); //#[allow_ci]

        let (other, _) = self_signed("unrelated");
        assert!(!reference.verify_endorsement(&other).unwrap()); //#[allow_ci]
    }

    #[test]
    fn software_tpm_keys_match_by_public_key() {
        let (cert, _) = self_signed("swtpm");
        let spki = cert.public_key().unwrap().public_key_to_der().unwrap(); //#[allow_ci]

        let mut reference = Reference::new();
        reference.add_software_tpm_key(&spki).unwrap(); //#[allow_ci]
        assert!(reference.is_software_tpm_key(&spki).unwrap()); //#[allow_ci]
        assert!(!reference.is_software_tpm_key(&[1, 2, 3]).unwrap()); //#[allow_ci]
    }
}
