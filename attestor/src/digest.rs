// SPDX-License-Identifier: Apache-2.0

//! Multi-algorithm digest sets.
//!
//! A [`DigestSet`] holds at most one digest per supported algorithm for a
//! single logical artifact. Baselines learn new algorithms over time through
//! [`DigestSet::union_with`], which only ever fills empty slots; a changed
//! value under an algorithm that is already tracked is never absorbed and
//! needs an explicit [`DigestSet::replace_with`] triggered by an override.

use base64::{
    engine::general_purpose::STANDARD as base64_standard, Engine as _,
};
use openssl::hash::{hash, MessageDigest};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_derive::{Deserialize as DeserializeDerive, Serialize as SerializeDerive};
use thiserror::Error;

pub const SHA1_LEN: usize = 20;
pub const SHA256_LEN: usize = 32;

#[derive(Error, Debug, PartialEq)]
pub enum DigestError {
    #[error("unknown pcr bank: no algorithm produces {0} byte digests")]
    UnknownBank(usize),
    #[error("cannot deserialize digest set")]
    Deserialization,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSet {
    pub sha1: Option<[u8; SHA1_LEN]>,
    pub sha256: Option<[u8; SHA256_LEN]>,
}

impl DigestSet {
    /// Builds a set holding `sum` under the algorithm its length implies.
    /// An empty slice yields the empty set.
    pub fn new(sum: &[u8]) -> Result<Self, DigestError> {
        match sum.len() {
            0 => Ok(DigestSet::default()),
            SHA1_LEN => {
                let mut buf = [0u8; SHA1_LEN];
                buf.copy_from_slice(sum);
                Ok(DigestSet {
                    sha1: Some(buf),
                    sha256: None,
                })
            }
            SHA256_LEN => {
                let mut buf = [0u8; SHA256_LEN];
                buf.copy_from_slice(sum);
                Ok(DigestSet {
                    sha1: None,
                    sha256: Some(buf),
                })
            }
            other => Err(DigestError::UnknownBank(other)),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.sha1.is_none() && self.sha256.is_none()
    }

    /// True iff no algorithm present on both sides disagrees. Absence of an
    /// algorithm on either side is not a mismatch.
    pub fn intersects_with(&self, other: &DigestSet) -> bool {
        let sha1_ok = match (&self.sha1, &other.sha1) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        let sha256_ok = match (&self.sha256, &other.sha256) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        sha1_ok && sha256_ok
    }

    /// Adds algorithms from `other` that are absent here. Present slots are
    /// never overwritten. Returns whether `self` changed.
    pub fn union_with(&mut self, other: &DigestSet) -> bool {
        let mut changed = false;
        if self.sha1.is_none() && other.sha1.is_some() {
            self.sha1 = other.sha1;
            changed = true;
        }
        if self.sha256.is_none() && other.sha256.is_some() {
            self.sha256 = other.sha256;
            changed = true;
        }
        changed
    }

    /// Overwrites slots with the values `other` carries. Used only on the
    /// override path.
    pub fn replace_with(&mut self, other: &DigestSet) -> bool {
        let mut changed = false;
        if other.sha1.is_some() {
            self.sha1 = other.sha1;
            changed = true;
        }
        if other.sha256.is_some() {
            self.sha256 = other.sha256;
            changed = true;
        }
        changed
    }

    /// Checks that every digest present in the set equals the hash of `buf`
    /// under its algorithm.
    pub fn compare_digest(&self, buf: &[u8]) -> bool {
        let mut ret = true;
        if let Some(sha1) = &self.sha1 {
            ret = matches!(hash(MessageDigest::sha1(), buf), Ok(sum) if &sum[..] == sha1)
                && ret;
        }
        if let Some(sha256) = &self.sha256 {
            ret = matches!(hash(MessageDigest::sha256(), buf), Ok(sum) if &sum[..] == sha256)
                && ret;
        }
        ret
    }
}

impl std::fmt::Display for DigestSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unset() {
            return write!(f, "{{}}");
        }
        let sha1 = self.sha1.map(hex::encode).unwrap_or_default();
        let sha256 = self.sha256.map(hex::encode).unwrap_or_default();
        write!(f, "{{{sha1} {sha256}}}")
    }
}

/// Renders the strongest differing algorithm of two sets as hex, for issue
/// arguments. Falls back to the strongest present value on each side.
pub fn before_after(before: &DigestSet, after: &DigestSet) -> (String, String) {
    if let (Some(b), Some(a)) = (&before.sha256, &after.sha256) {
        if b != a {
            return (hex::encode(b), hex::encode(a));
        }
    }
    if let (Some(b), Some(a)) = (&before.sha1, &after.sha1) {
        if b != a {
            return (hex::encode(b), hex::encode(a));
        }
    }
    let pick = |set: &DigestSet| {
        if let Some(sha256) = &set.sha256 {
            hex::encode(sha256)
        } else if let Some(sha1) = &set.sha1 {
            hex::encode(sha1)
        } else {
            String::new()
        }
    };
    (pick(before), pick(after))
}

#[derive(SerializeDerive, DeserializeDerive, Default)]
struct SerializedDigestSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
}

impl Serialize for DigestSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let ser = SerializedDigestSet {
            sha1: self.sha1.map(|d| base64_standard.encode(d)),
            sha256: self.sha256.map(|d| base64_standard.encode(d)),
        };
        ser.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DigestSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ser = SerializedDigestSet::deserialize(deserializer)?;
        let mut set = DigestSet::default();
        if let Some(encoded) = ser.sha1 {
            let buf = base64_standard
                .decode(encoded)
                .map_err(|_| D::Error::custom(DigestError::Deserialization))?;
            if buf.len() != SHA1_LEN {
                return Err(D::Error::custom(DigestError::Deserialization));
            }
            let mut sha1 = [0u8; SHA1_LEN];
            sha1.copy_from_slice(&buf);
            set.sha1 = Some(sha1);
        }
        if let Some(encoded) = ser.sha256 {
            let buf = base64_standard
                .decode(encoded)
                .map_err(|_| D::Error::custom(DigestError::Deserialization))?;
            if buf.len() != SHA256_LEN {
                return Err(D::Error::custom(DigestError::Deserialization));
            }
            let mut sha256 = [0u8; SHA256_LEN];
            sha256.copy_from_slice(&buf);
            set.sha256 = Some(sha256);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_set(byte: u8) -> DigestSet {
        DigestSet::new(&[byte; SHA1_LEN]).unwrap() //#[allow_ci]
    }

    fn sha256_set(byte: u8) -> DigestSet {
        DigestSet::new(&[byte; SHA256_LEN]).unwrap() //#[allow_ci]
    }

    #[test]
    fn new_by_length() {
        assert!(sha1_set(1).sha1.is_some());
        assert!(sha256_set(2).sha256.is_some());
        assert!(DigestSet::new(&[]).unwrap().is_unset()); //#[allow_ci]
        assert_eq!(
            DigestSet::new(&[0u8; 21]),
            Err(DigestError::UnknownBank(21))
        );
    }

    #[test]
    fn intersects_is_symmetric_and_vacuous_on_absence() {
        let a = sha1_set(1);
        let b = sha256_set(2);
        // no common algorithm: compatible both ways
        assert!(a.intersects_with(&b));
        assert!(b.intersects_with(&a));

        let mut c = sha1_set(1);
        c.sha256 = sha256_set(2).sha256;
        assert!(a.intersects_with(&c));
        assert!(c.intersects_with(&a));

        let d = sha1_set(3);
        assert!(!a.intersects_with(&d));
        assert!(!d.intersects_with(&a));
    }

    #[test]
    fn union_fills_absent_slots_only() {
        let mut base = sha1_set(1);
        let other = {
            let mut s = sha1_set(9);
            s.sha256 = sha256_set(2).sha256;
            s
        };
        assert!(base.union_with(&other));
        // present sha1 kept, absent sha256 learned
        assert_eq!(base.sha1, sha1_set(1).sha1);
        assert_eq!(base.sha256, other.sha256);
    }

    #[test]
    fn union_is_idempotent() {
        let mut a = sha1_set(1);
        let b = sha256_set(2);
        assert!(a.union_with(&b));
        let after_first = a.clone();
        assert!(!a.union_with(&b));
        assert_eq!(a, after_first);
    }

    #[test]
    fn replace_overwrites_present_slots() {
        let mut base = sha1_set(1);
        let other = sha1_set(9);
        assert!(base.replace_with(&other));
        assert_eq!(base.sha1, other.sha1);
        // replace with an empty set changes nothing
        assert!(!base.replace_with(&DigestSet::default()));
    }

    #[test]
    fn compare_digest_checks_every_algorithm() {
        let data = b"hello world";
        let sha1 = hash(MessageDigest::sha1(), data).unwrap(); //#[allow_ci]
        let sha256 = hash(MessageDigest::sha256(), data).unwrap(); //#[allow_ci]
        let mut set = DigestSet::new(&sha1).unwrap(); //#[allow_ci]
        assert!(set.union_with(&DigestSet::new(&sha256).unwrap())); //#[allow_ci]
        assert!(set.compare_digest(data));
        assert!(!set.compare_digest(b"hello worle"));
        // the empty set matches everything
        assert!(DigestSet::default().compare_digest(data));
    }

    #[test]
    fn before_after_prefers_differing_sha256() {
        let mut before = sha1_set(1);
        before.sha256 = sha256_set(2).sha256;
        let mut after = sha1_set(1);
        after.sha256 = sha256_set(3).sha256;
        let (b, a) = before_after(&before, &after);
        assert_eq!(b, hex::encode([2u8; SHA256_LEN]));
        assert_eq!(a, hex::encode([3u8; SHA256_LEN]));
    }

    #[test]
    fn serde_round_trip() {
        let mut set = sha1_set(1);
        set.sha256 = sha256_set(2).sha256;
        let json = serde_json::to_string(&set).unwrap(); //#[allow_ci]
        let back: DigestSet = serde_json::from_str(&json).unwrap(); //#[allow_ci]
        assert_eq!(set, back);

        // absent slots stay absent and are omitted on the wire
        let sparse = sha1_set(7);
        let json = serde_json::to_string(&sparse).unwrap(); //#[allow_ci]
        assert!(!json.contains("sha256"));
        let back: DigestSet = serde_json::from_str(&json).unwrap(); //#[allow_ci]
        assert_eq!(sparse, back);
    }

    #[test]
    fn deserialize_rejects_bad_lengths() {
        let res: Result<DigestSet, _> =
            serde_json::from_str("{\"sha1\":\"AAEC\"}");
        assert!(res.is_err());
    }
}
