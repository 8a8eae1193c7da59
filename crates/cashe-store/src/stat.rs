use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

/// Lazily fetched, explicitly invalidated filesystem metadata for one object.
///
/// The first [`ensure`](Self::ensure) stats the path and remembers the
/// outcome, absent included; later calls answer from memory until
/// [`invalidate`](Self::invalidate) is called.
#[derive(Clone, Debug, Default)]
pub struct StatCache {
    fetched: bool,
    size: u64,
    metadata: Option<Metadata>,
}

impl StatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stat `path` once and report whether it exists.
    ///
    /// A missing file (or missing parent directory) is a cached `false`.
    /// Any other error is returned and nothing is recorded.
    pub fn ensure(&mut self, path: &Path) -> io::Result<bool> {
        if self.fetched {
            return Ok(self.metadata.is_some());
        }
        match fs::metadata(path) {
            Ok(meta) => {
                self.size = meta.len();
                self.metadata = Some(meta);
            }
            Err(e) if is_absent(&e) => {
                self.size = 0;
                self.metadata = None;
            }
            Err(e) => return Err(e),
        }
        self.fetched = true;
        Ok(self.metadata.is_some())
    }

    /// Whether a stat has been attempted since the last invalidation.
    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    /// Cached size in bytes; 0 when unknown or absent.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Cached metadata, if the last stat succeeded.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Forget everything; the next `ensure` stats again.
    pub fn invalidate(&mut self) {
        self.fetched = false;
        self.size = 0;
        self.metadata = None;
    }
}

fn is_absent(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        false
    }
}
