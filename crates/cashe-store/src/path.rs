//! On-disk layout: `root/<checksum_type>/<shard>/<checksum_data>`.
//!
//! The shard is the first [`SHARD_PREFIX_LEN`] hex characters of the digest,
//! which spreads objects of one algorithm over 65536 directories. Paths are a
//! pure function of the key and the root; nothing here touches the disk.

use std::path::{Path, PathBuf};

use cashe_types::{is_hex_digest, ChecksumType, ObjectKey};

/// Number of leading digest characters used as the shard directory name.
pub const SHARD_PREFIX_LEN: usize = 4;

/// Directory holding every object of one algorithm.
pub fn type_dir(root: &Path, checksum_type: ChecksumType) -> PathBuf {
    root.join(checksum_type.name())
}

/// Shard directory for `key`.
pub fn dirname(key: &ObjectKey, root: &Path) -> PathBuf {
    type_dir(root, key.checksum_type()).join(key.prefix(SHARD_PREFIX_LEN))
}

/// Full path of the object file for `key`.
pub fn filename(key: &ObjectKey, root: &Path) -> PathBuf {
    dirname(key, root).join(key.checksum_data())
}

/// Returns `true` if `name` is a well-formed shard directory name.
pub fn is_shard_name(name: &str) -> bool {
    name.len() == SHARD_PREFIX_LEN && is_hex_digest(name)
}

/// Recover the key from an object path, if it fits the layout exactly.
///
/// The file must sit in a valid shard directory of a known algorithm, start
/// with that shard, and be a valid digest for the algorithm.
pub fn parse_object_path(root: &Path, path: &Path) -> Option<ObjectKey> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = rel.iter().map(|c| c.to_str());
    let (ty, shard, name) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Some(ty)), Some(Some(shard)), Some(Some(name)), None) => (ty, shard, name),
        _ => return None,
    };
    let checksum_type = ChecksumType::from_name(ty)?;
    if checksum_type.name() != ty || !is_shard_name(shard) || !name.starts_with(shard) {
        return None;
    }
    // Keys lower-case their input, so reject anything that is not already canonical.
    if !is_hex_digest(name) {
        return None;
    }
    ObjectKey::new(checksum_type, name).ok()
}
