//! Atomic filesystem primitives.
//!
//! Every write that lands on a final path goes through a uniquely named
//! temporary file in the destination directory followed by a rename, so a
//! reader sees either no file or a complete one. Hardlinking is tried first
//! as an optimisation only; crossing filesystems falls back to a copy.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::SystemTime;

use cashe_digest::Checksum;
use cashe_types::ChecksumType;
use filetime::FileTime;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Read size used when digesting files.
const CHUNK_SIZE: usize = 8 * 1024;

/// Prefix of temporary files created next to their final destination.
pub const TEMP_PREFIX: &str = ".cashe-";

/// How a file ended up at its destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    /// Hard link: destination shares the source's inode.
    HardLink,
    /// Independent replica written by [`copy_atomic`].
    Copy,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardLink => write!(f, "link"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

/// Hardlink `src` to `dst`, copying atomically when a link is impossible.
///
/// An existing `dst` is replaced atomically unless it already is `src`.
/// Cross-device (`EXDEV`) and link-count (`EMLINK`) failures fall back to
/// [`copy_atomic`]; any other failure is returned.
pub fn link_or_fallback(src: &Path, dst: &Path) -> StoreResult<LinkType> {
    link_with(src, dst, |from, to| fs::hard_link(from, to))
}

/// [`link_or_fallback`] with the hardlink operation supplied by the caller.
pub(crate) fn link_with<F>(src: &Path, dst: &Path, mut link: F) -> StoreResult<LinkType>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let result = match link(src, dst) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if is_same_file(src, dst)? {
                debug!(dst = %dst.display(), "destination already linked");
                return Ok(LinkType::HardLink);
            }
            replace_with_link(src, dst, &mut link)
        }
        other => other,
    };

    match result {
        Ok(()) => {
            debug!(src = %src.display(), dst = %dst.display(), "hard linked");
            Ok(LinkType::HardLink)
        }
        Err(e) if needs_copy(&e) => {
            debug!(src = %src.display(), dst = %dst.display(), error = %e, "link failed, copying");
            copy_atomic(src, dst)?;
            Ok(LinkType::Copy)
        }
        Err(e) => Err(e.into()),
    }
}

/// Link `src` under a fresh temporary name beside `dst`, then rename it over `dst`.
fn replace_with_link<F>(src: &Path, dst: &Path, link: &mut F) -> io::Result<()>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    let tmp = temp_builder().make_in(parent_dir(dst), |path| link(src, path))?;
    tmp.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

/// Copy `src` to `dst` through a temporary file in `dst`'s directory.
///
/// The temporary file is fully written and synced before being renamed onto
/// `dst`; it is removed if any earlier step fails. The destination directory
/// is created if missing. Permission bits are carried over from `src`.
pub fn copy_atomic(src: &Path, dst: &Path) -> StoreResult<()> {
    let dir = parent_dir(dst);
    let mut input = File::open(src)?;
    let permissions = input.metadata()?.permissions();
    fs::create_dir_all(dir)?;

    let mut tmp: NamedTempFile = temp_builder().tempfile_in(dir)?;
    let copied = io::copy(&mut input, tmp.as_file_mut())?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(dst).map_err(|e| e.error)?;

    debug!(src = %src.display(), dst = %dst.display(), bytes = copied, "atomic copy committed");
    Ok(())
}

/// Digest a whole file, returning lowercase hex.
///
/// With `expected_size`, the number of bytes read must match exactly or
/// [`StoreError::SizeMismatch`] is returned; reading stops as soon as the
/// count overshoots. With `set_mtime`, the file's modification time is set
/// once digesting completes.
pub fn file_to_hex_digest(
    checksum_type: ChecksumType,
    path: &Path,
    expected_size: Option<u64>,
    set_mtime: Option<SystemTime>,
) -> StoreResult<String> {
    let mut file = File::open(path)?;
    let mut checksum = Checksum::new(checksum_type);
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        checksum.update(&buf[..n]);
        total += n as u64;
        if expected_size.is_some_and(|expected| total > expected) {
            break;
        }
    }
    drop(file);

    if let Some(expected) = expected_size {
        if total != expected {
            return Err(StoreError::SizeMismatch {
                path: path.to_path_buf(),
                expected,
                actual: total,
            });
        }
    }
    if let Some(mtime) = set_mtime {
        filetime::set_file_mtime(path, FileTime::from_system_time(mtime))?;
    }

    Ok(checksum.finalize())
}

/// Put back access and modification times after a read disturbed them.
pub fn restore_times(path: &Path, accessed: SystemTime, modified: SystemTime) -> StoreResult<()> {
    filetime::set_file_times(
        path,
        FileTime::from_system_time(accessed),
        FileTime::from_system_time(modified),
    )?;
    Ok(())
}

/// Returns `true` if both paths name the same inode on the same device.
pub fn is_same_file(a: &Path, b: &Path) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let (ma, mb) = (fs::metadata(a)?, fs::metadata(b)?);
        Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
    }

    #[cfg(not(unix))]
    {
        let _ = (a, b);
        Ok(false)
    }
}

fn temp_builder() -> tempfile::Builder<'static, 'static> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(TEMP_PREFIX);
    builder
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Link failures that mean "use a copy instead" rather than a fault.
fn needs_copy(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(e.raw_os_error(), Some(libc::EXDEV) | Some(libc::EMLINK))
    }

    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashe_digest::hex_digest;

    fn write(path: &Path, data: &[u8]) {
        fs::write(path, data).unwrap();
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn copy_atomic_replicates_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("out/dst");
        write(&src, b"payload");

        copy_atomic(&src, &dst).unwrap();

        assert_eq!(fs::read(&dst).unwrap(), b"payload");
        assert!(!is_same_file(&src, &dst).unwrap());
        assert_eq!(dir_entries(&dir.path().join("out")), vec!["dst"]);
    }

    #[test]
    fn copy_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"new");
        write(&dst, b"old contents");

        copy_atomic(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"new");
    }

    #[test]
    fn copy_atomic_missing_source_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();

        let err = copy_atomic(&dir.path().join("missing"), &out.join("dst")).unwrap_err();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
        assert!(dir_entries(&out).is_empty());
    }

    #[test]
    fn copy_atomic_failed_commit_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"payload");
        fs::create_dir(&dst).unwrap();
        write(&dst.join("keep"), b"");

        assert!(copy_atomic(&src, &dst).is_err());
        assert_eq!(dir_entries(dir.path()), vec!["dst", "src"]);
        assert_eq!(dir_entries(&dst), vec!["keep"]);
    }

    #[cfg(unix)]
    #[test]
    fn link_failed_replace_removes_temp() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"payload");
        fs::create_dir(&dst).unwrap();
        write(&dst.join("keep"), b"");

        assert!(link_or_fallback(&src, &dst).is_err());
        assert_eq!(dir_entries(dir.path()), vec!["dst", "src"]);
        assert_eq!(fs::metadata(&src).unwrap().nlink(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn copy_atomic_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"x");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o640)).unwrap();

        copy_atomic(&src, &dst).unwrap();
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[test]
    fn link_creates_hardlink() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"linked");

        assert_eq!(link_or_fallback(&src, &dst).unwrap(), LinkType::HardLink);
        assert!(is_same_file(&src, &dst).unwrap());
    }

    #[test]
    fn link_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"linked");

        link_or_fallback(&src, &dst).unwrap();
        assert_eq!(link_or_fallback(&src, &dst).unwrap(), LinkType::HardLink);
        assert_eq!(dir_entries(dir.path()), vec!["dst", "src"]);
    }

    #[test]
    fn link_replaces_different_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"fresh");
        write(&dst, b"stale");

        assert_eq!(link_or_fallback(&src, &dst).unwrap(), LinkType::HardLink);
        assert!(is_same_file(&src, &dst).unwrap());
        assert_eq!(fs::read(&dst).unwrap(), b"fresh");
        assert_eq!(dir_entries(dir.path()), vec!["dst", "src"]);
    }

    #[cfg(unix)]
    #[test]
    fn cross_device_falls_back_to_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"across devices");

        let kind = link_with(&src, &dst, |_, _| {
            Err(io::Error::from_raw_os_error(libc::EXDEV))
        })
        .unwrap();

        assert_eq!(kind, LinkType::Copy);
        assert_eq!(fs::read(&dst).unwrap(), b"across devices");
        assert!(!is_same_file(&src, &dst).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn cross_device_replacement_falls_back_to_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"new");
        write(&dst, b"old");

        let mut calls = 0;
        let kind = link_with(&src, &dst, |_, to| {
            calls += 1;
            if to.exists() && calls == 1 {
                Err(io::Error::from(io::ErrorKind::AlreadyExists))
            } else {
                Err(io::Error::from_raw_os_error(libc::EXDEV))
            }
        })
        .unwrap();

        assert_eq!(kind, LinkType::Copy);
        assert_eq!(fs::read(&dst).unwrap(), b"new");
        assert_eq!(dir_entries(dir.path()), vec!["dst", "src"]);
    }

    #[test]
    fn other_link_errors_surface() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        write(&src, b"x");

        let err = link_with(&src, &dst, |_, _| {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        })
        .unwrap_err();

        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::PermissionDenied));
        assert!(!dst.exists());
    }

    #[test]
    fn link_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = link_or_fallback(&dir.path().join("nope"), &dir.path().join("dst")).unwrap_err();
        assert!(matches!(err, StoreError::Io(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn digest_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        write(&path, b"a");

        let d1 = file_to_hex_digest(ChecksumType::Sha256, &path, None, None).unwrap();
        let d2 = file_to_hex_digest(ChecksumType::Sha256, &path, None, None).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
        assert_eq!(
            d1,
            "ca978112ca1bbdcafac231b39a23dc4da786eff8147c4e72b9807785afee48bb"
        );
    }

    #[test]
    fn digest_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        write(&path, &data);

        for ty in ChecksumType::ALL {
            let digest = file_to_hex_digest(ty, &path, Some(data.len() as u64), None).unwrap();
            assert_eq!(digest, hex_digest(ty, &data));
            assert_eq!(digest.len(), ty.hex_len());
        }
    }

    #[test]
    fn digest_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        write(&path, b"four");

        let short = file_to_hex_digest(ChecksumType::Md5, &path, Some(3), None).unwrap_err();
        assert!(matches!(short, StoreError::SizeMismatch { expected: 3, actual: 4, .. }));

        let long = file_to_hex_digest(ChecksumType::Md5, &path, Some(10), None).unwrap_err();
        assert!(matches!(long, StoreError::SizeMismatch { expected: 10, actual: 4, .. }));
    }

    #[test]
    fn digest_sets_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        write(&path, b"timed");
        let when = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);

        file_to_hex_digest(ChecksumType::Sha1, &path, None, Some(when)).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), when);
    }

    #[test]
    fn digest_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            file_to_hex_digest(ChecksumType::Sha1, &dir.path().join("nope"), None, None).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
