use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checksum_type::ChecksumType;
use crate::error::TypeError;

/// Content-addressed identity of a cached object.
///
/// An `ObjectKey` is the digest algorithm plus the lowercase hex digest of the
/// object's content. It is validated on construction and immutable afterwards.
/// Equality and ordering consider both fields, algorithm name first, and
/// nothing else.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawObjectKey")]
pub struct ObjectKey {
    checksum_type: ChecksumType,
    checksum_data: String,
}

#[derive(Deserialize)]
struct RawObjectKey {
    checksum_type: String,
    checksum_data: String,
}

impl TryFrom<RawObjectKey> for ObjectKey {
    type Error = TypeError;

    fn try_from(raw: RawObjectKey) -> Result<Self, Self::Error> {
        Self::parse(&raw.checksum_type, &raw.checksum_data)
    }
}

impl ObjectKey {
    /// Build a key, lower-casing the digest and checking its length and alphabet.
    pub fn new(checksum_type: ChecksumType, checksum_data: &str) -> Result<Self, TypeError> {
        let expected = checksum_type.hex_len();
        if checksum_data.len() != expected {
            return Err(TypeError::InvalidLength {
                checksum_type: checksum_type.name(),
                expected,
                actual: checksum_data.len(),
            });
        }
        let checksum_data = checksum_data.to_ascii_lowercase();
        if !is_hex_digest(&checksum_data) {
            return Err(TypeError::InvalidHex(checksum_data));
        }
        Ok(Self {
            checksum_type,
            checksum_data,
        })
    }

    /// Build a key from an algorithm name (aliases allowed) and a digest.
    pub fn parse(checksum_type: &str, checksum_data: &str) -> Result<Self, TypeError> {
        Self::new(checksum_type.parse()?, checksum_data)
    }

    /// The digest algorithm.
    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// The lowercase hex digest.
    pub fn checksum_data(&self) -> &str {
        &self.checksum_data
    }

    /// Leading `len` hex characters of the digest (clamped to its length).
    pub fn prefix(&self, len: usize) -> &str {
        &self.checksum_data[..len.min(self.checksum_data.len())]
    }
}

/// Returns `true` if `s` is non-empty and made only of lowercase hex digits.
pub fn is_hex_digest(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({self})")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.checksum_type, self.checksum_data)
    }
}

impl FromStr for ObjectKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, data) = s
            .split_once(':')
            .ok_or_else(|| TypeError::InvalidFormat(s.to_string()))?;
        Self::parse(ty, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SHA256_A: &str = "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb";
    const SHA256_B: &str = "3e23e8160039594a33894f6564e1b1348bbd7a0088d42c4acb73eeaed59c009d";

    #[test]
    fn accepts_valid_digest() {
        let key = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        assert_eq!(key.checksum_type(), ChecksumType::Sha256);
        assert_eq!(key.checksum_data(), SHA256_A);
    }

    #[test]
    fn digest_is_lowercased() {
        let key = ObjectKey::new(ChecksumType::Sha256, &SHA256_A.to_uppercase()).unwrap();
        assert_eq!(key.checksum_data(), SHA256_A);
    }

    #[test]
    fn wrong_length_rejected() {
        let err = ObjectKey::new(ChecksumType::Md5, SHA256_A).unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                checksum_type: "md5",
                expected: 32,
                actual: 64
            }
        );
    }

    #[test]
    fn non_hex_rejected() {
        let bad = "z".repeat(40);
        let err = ObjectKey::new(ChecksumType::Sha1, &bad).unwrap_err();
        assert!(matches!(err, TypeError::InvalidHex(_)));
    }

    #[test]
    fn parse_resolves_alias() {
        let key = ObjectKey::parse("sha2", SHA256_A).unwrap();
        assert_eq!(key.checksum_type(), ChecksumType::Sha256);
    }

    #[test]
    fn parse_rejects_unknown_type() {
        let err = ObjectKey::parse("sha384", SHA256_A).unwrap_err();
        assert_eq!(err, TypeError::UnknownChecksum("sha384".into()));
    }

    #[test]
    fn equality_uses_both_fields() {
        let a = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        let a2 = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        let b = ObjectKey::new(ChecksumType::Sha256, SHA256_B).unwrap();
        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn ordering_is_type_then_digest() {
        let md5 = ObjectKey::new(ChecksumType::Md5, &"f".repeat(32)).unwrap();
        let a = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        let b = ObjectKey::new(ChecksumType::Sha256, SHA256_B).unwrap();
        assert!(md5 < b);
        assert!(b < a);
        let mut keys = vec![a.clone(), md5.clone(), b.clone()];
        keys.sort();
        assert_eq!(keys, vec![md5, b, a]);
    }

    #[test]
    fn display_and_parse_roundtrip() {
        let key = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        let text = key.to_string();
        assert_eq!(text, format!("sha256:{SHA256_A}"));
        assert_eq!(text.parse::<ObjectKey>().unwrap(), key);
    }

    #[test]
    fn from_str_requires_separator() {
        let err = SHA256_A.parse::<ObjectKey>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidFormat(_)));
    }

    #[test]
    fn prefix_is_clamped() {
        let key = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        assert_eq!(key.prefix(4), "ca97");
        assert_eq!(key.prefix(1000), SHA256_A);
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let key = ObjectKey::new(ChecksumType::Sha256, SHA256_A).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        let parsed: ObjectKey = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, key);

        let bad = r#"{"checksum_type":"sha256","checksum_data":"abc"}"#;
        assert!(serde_json::from_str::<ObjectKey>(bad).is_err());
    }

    proptest! {
        #[test]
        fn any_valid_sha1_digest_is_accepted(digest in "[0-9a-fA-F]{40}") {
            let key = ObjectKey::new(ChecksumType::Sha1, &digest).unwrap();
            prop_assert_eq!(key.checksum_data(), digest.to_ascii_lowercase());
        }

        #[test]
        fn equality_matches_digest_equality(a in "[0-9a-f]{32}", b in "[0-9a-f]{32}") {
            let ka = ObjectKey::new(ChecksumType::Md5, &a).unwrap();
            let kb = ObjectKey::new(ChecksumType::Md5, &b).unwrap();
            prop_assert_eq!(ka == kb, a == b);
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
        }
    }
}
