use std::cell::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
#[cfg(unix)]
use std::time::{Duration, UNIX_EPOCH};

use cashe_types::{ChecksumType, ObjectKey};
use tracing::{debug, info, warn};

use crate::atomic::{copy_atomic, file_to_hex_digest, link_with, restore_times, LinkType};
use crate::error::{StoreError, StoreResult};
use crate::path;
use crate::stat::StatCache;

/// Handle to one object in the cache.
///
/// A `CacheObject` binds an [`ObjectKey`] to a cache root. Creating one does
/// no I/O. Filesystem metadata is fetched on first use and dropped again by
/// any operation that changes the object on disk. Equality and ordering look
/// at the key only.
#[derive(Clone, Debug)]
pub struct CacheObject {
    key: ObjectKey,
    root: Arc<Path>,
    link: bool,
    stat: StatCache,
    path: OnceCell<PathBuf>,
}

impl CacheObject {
    /// Handle for `key` under `root`. Prefers hardlinks by default.
    pub fn new(root: Arc<Path>, key: ObjectKey) -> Self {
        Self {
            key,
            root,
            link: true,
            stat: StatCache::new(),
            path: OnceCell::new(),
        }
    }

    /// Validate `checksum_type`/`checksum_data` and build a handle.
    pub fn make(root: Arc<Path>, checksum_type: &str, checksum_data: &str) -> StoreResult<Self> {
        Ok(Self::new(root, ObjectKey::parse(checksum_type, checksum_data)?))
    }

    pub fn with_link_preference(mut self, link: bool) -> Self {
        self.link = link;
        self
    }

    /// Whether save/load default to hardlinking.
    pub fn link_preference(&self) -> bool {
        self.link
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.key.checksum_type()
    }

    pub fn checksum_data(&self) -> &str {
        self.key.checksum_data()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shard directory holding this object.
    pub fn dirname(&self) -> PathBuf {
        path::dirname(&self.key, &self.root)
    }

    /// Full path of the object file.
    pub fn path(&self) -> &Path {
        self.path.get_or_init(|| path::filename(&self.key, &self.root))
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Stat the object once; `true` if it is present.
    pub fn stat(&mut self) -> StoreResult<bool> {
        let path = self.path().to_path_buf();
        Ok(self.stat.ensure(&path)?)
    }

    /// Whether the object is present, as of the last stat.
    pub fn exists(&mut self) -> StoreResult<bool> {
        self.stat()
    }

    /// Size in bytes, stat'ing if needed; 0 when absent.
    pub fn size(&mut self) -> StoreResult<u64> {
        self.stat()?;
        Ok(self.stat.size())
    }

    /// Size from the last stat without touching the disk; 0 when unknown.
    pub fn cached_size(&self) -> u64 {
        self.stat.size()
    }

    /// Full metadata, stat'ing if needed.
    pub fn metadata(&mut self) -> StoreResult<Option<&Metadata>> {
        self.stat()?;
        Ok(self.stat.metadata())
    }

    /// Hard link count; 0 when absent. More than one means something outside
    /// the cache still uses the object.
    pub fn nlink(&mut self) -> StoreResult<u64> {
        Ok(self.metadata()?.map(nlink_of).unwrap_or(0))
    }

    pub fn modified(&mut self) -> StoreResult<Option<SystemTime>> {
        Ok(self.metadata()?.and_then(|m| m.modified().ok()))
    }

    pub fn accessed(&mut self) -> StoreResult<Option<SystemTime>> {
        Ok(self.metadata()?.and_then(|m| m.accessed().ok()))
    }

    /// Inode change time (ctime). Off unix this is the creation time.
    pub fn changed(&mut self) -> StoreResult<Option<SystemTime>> {
        Ok(self.metadata()?.and_then(changed_of))
    }

    /// Drop cached metadata so the next query stats again.
    pub fn invalidate(&mut self) {
        self.stat.invalidate();
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Ingest `source` as this object.
    ///
    /// The shard directory is created if needed. With `prefer_link` the
    /// source is hardlinked in (copied if that is impossible), otherwise it is
    /// copied. The object path only ever changes by atomic rename. With
    /// `verify`, the committed file is digested; on mismatch it is removed
    /// again and [`StoreError::IntegrityMismatch`] is returned, which means
    /// the source did not match the key.
    pub fn save(&mut self, source: &Path, verify: bool, prefer_link: bool) -> StoreResult<LinkType> {
        self.save_with(source, verify, prefer_link, hard_link)
    }

    pub(crate) fn save_with<F>(
        &mut self,
        source: &Path,
        verify: bool,
        prefer_link: bool,
        link: F,
    ) -> StoreResult<LinkType>
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let target = self.path().to_path_buf();
        fs::create_dir_all(self.dirname())?;

        let transfer = transfer(source, &target, prefer_link, link);
        self.stat.invalidate();
        let transfer = transfer?;
        debug!(key = %self.key, source = %source.display(), via = %transfer, "object saved");

        if verify {
            let computed = file_to_hex_digest(self.checksum_type(), &target, None, None)?;
            if computed != self.checksum_data() {
                warn!(key = %self.key, %computed, source = %source.display(), "saved content does not match key");
                self.unlink()?;
                return Err(StoreError::IntegrityMismatch {
                    key: self.key.clone(),
                    computed,
                });
            }
        }
        Ok(transfer)
    }

    /// Materialize this object at `dest`.
    ///
    /// Fails with [`StoreError::NotFound`] if the object is not cached. With
    /// `verify`, `dest` is digested afterwards; on mismatch both `dest` and
    /// the corrupt cached object are removed and
    /// [`StoreError::IntegrityMismatch`] is returned.
    pub fn load(&mut self, dest: &Path, verify: bool, prefer_link: bool) -> StoreResult<LinkType> {
        self.load_with(dest, verify, prefer_link, hard_link)
    }

    pub(crate) fn load_with<F>(
        &mut self,
        dest: &Path,
        verify: bool,
        prefer_link: bool,
        link: F,
    ) -> StoreResult<LinkType>
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let source = self.path().to_path_buf();
        self.stat.invalidate();
        if !self.stat()? {
            return Err(StoreError::NotFound(self.key.clone()));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let transfer = transfer(&source, dest, prefer_link, link);
        // Another process may have removed the object since the stat above.
        let transfer = match transfer {
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                self.stat.invalidate();
                return Err(StoreError::NotFound(self.key.clone()));
            }
            other => other?,
        };
        if transfer == LinkType::HardLink {
            // The link count just changed.
            self.stat.invalidate();
        }
        debug!(key = %self.key, dest = %dest.display(), via = %transfer, "object loaded");

        if verify {
            let computed = file_to_hex_digest(self.checksum_type(), dest, None, None)?;
            if computed != self.checksum_data() {
                warn!(key = %self.key, %computed, "cached object is corrupt; discarding");
                remove_file_if_present(dest)?;
                self.unlink()?;
                return Err(StoreError::IntegrityMismatch {
                    key: self.key.clone(),
                    computed,
                });
            }
        }
        Ok(transfer)
    }

    /// [`save`](Self::save) using this handle's link preference.
    pub fn put(&mut self, source: &Path, verify: bool) -> StoreResult<LinkType> {
        self.save(source, verify, self.link)
    }

    /// [`load`](Self::load) using this handle's link preference.
    pub fn get(&mut self, dest: &Path, verify: bool) -> StoreResult<LinkType> {
        self.load(dest, verify, self.link)
    }

    /// Remove the object from the cache.
    ///
    /// Returns `false` if it was already absent. The shard directory is
    /// removed too unless other objects still live in it.
    pub fn unlink(&mut self) -> StoreResult<bool> {
        let target = self.path().to_path_buf();
        let removed = remove_file_if_present(&target);
        self.stat.invalidate();
        if !removed? {
            return Ok(false);
        }
        remove_dir_if_empty(&self.dirname())?;
        info!(key = %self.key, "object removed");
        Ok(true)
    }

    /// Re-digest the cached file and discard it if it does not match the key.
    ///
    /// Access and modification times are restored after reading. Returns
    /// `Ok(false)` when the object was corrupt (and has been unlinked), and
    /// [`StoreError::NotFound`] when it is not cached at all.
    pub fn verify(&mut self) -> StoreResult<bool> {
        self.stat.invalidate();
        let found = self
            .metadata()?
            .map(|meta| (meta.len(), meta.accessed().ok().zip(meta.modified().ok())));
        let Some((size, times)) = found else {
            return Err(StoreError::NotFound(self.key.clone()));
        };
        let target = self.path().to_path_buf();

        let computed = file_to_hex_digest(self.checksum_type(), &target, Some(size), None)?;
        if let Some((accessed, modified)) = times {
            restore_times(&target, accessed, modified)?;
        }
        if computed == self.checksum_data() {
            return Ok(true);
        }
        warn!(key = %self.key, %computed, "cached object failed verification");
        self.unlink()?;
        Ok(false)
    }
}

impl PartialEq for CacheObject {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CacheObject {}

impl PartialOrd for CacheObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for CacheObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

fn hard_link(src: &Path, dst: &Path) -> io::Result<()> {
    fs::hard_link(src, dst)
}

/// Link (falling back to a copy) or copy `from` onto `to`.
fn transfer<F>(from: &Path, to: &Path, prefer_link: bool, link: F) -> StoreResult<LinkType>
where
    F: FnMut(&Path, &Path) -> io::Result<()>,
{
    if prefer_link {
        link_with(from, to, link)
    } else {
        copy_atomic(from, to).map(|()| LinkType::Copy)
    }
}

fn changed_of(meta: &Metadata) -> Option<SystemTime> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let offset = Duration::from_secs(meta.ctime().unsigned_abs());
        let whole = if meta.ctime() >= 0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        };
        let nanos = u64::try_from(meta.ctime_nsec()).unwrap_or(0);
        whole.and_then(|t| t.checked_add(Duration::from_nanos(nanos)))
    }
    #[cfg(not(unix))]
    {
        meta.created().ok()
    }
}

fn nlink_of(meta: &Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.nlink()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        1
    }
}

/// `rm -f`: remove a file, reporting whether it was there.
pub(crate) fn remove_file_if_present(path: &Path) -> StoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Remove a directory unless it still has entries (or is already gone).
pub(crate) fn remove_dir_if_empty(dir: &Path) -> StoreResult<bool> {
    match fs::remove_dir(dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound || is_not_empty(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn is_not_empty(e: &io::Error) -> bool {
    #[cfg(unix)]
    {
        // POSIX allows either errno for a non-empty directory.
        matches!(e.raw_os_error(), Some(libc::ENOTEMPTY) | Some(libc::EEXIST))
    }
    #[cfg(not(unix))]
    {
        // ERROR_DIR_NOT_EMPTY
        e.raw_os_error() == Some(145)
    }
}
