use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cashe_types::{ChecksumType, ObjectKey};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::atomic::LinkType;
use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::object::{remove_dir_if_empty, CacheObject};
use crate::path;

/// An opened cache directory plus the policy applied to its objects.
///
/// Every [`CacheObject`] handed out shares the store's root and starts with
/// the configured link preference. [`save`](Self::save) and
/// [`load`](Self::load) add the configured verification policy.
#[derive(Clone, Debug)]
pub struct Store {
    config: Arc<StoreConfig>,
    root: Arc<Path>,
}

impl Store {
    /// Open the cache described by `config`, creating its root if needed.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(&config.root)?;
        let root: Arc<Path> = Arc::from(config.root.as_path());
        debug!(root = %root.display(), try_link = config.try_link, "store opened");
        Ok(Self {
            config: Arc::new(config),
            root,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validated handle for `checksum_type:checksum_data`. No I/O.
    pub fn object(&self, checksum_type: &str, checksum_data: &str) -> StoreResult<CacheObject> {
        let key = ObjectKey::parse(checksum_type, checksum_data)?;
        Ok(self.object_for(key))
    }

    /// Handle for an already validated key.
    pub fn object_for(&self, key: ObjectKey) -> CacheObject {
        CacheObject::new(self.root.clone(), key).with_link_preference(self.config.try_link)
    }

    /// Save `source` as `obj`, verifying when `checksum_save` is set.
    pub fn save(&self, obj: &mut CacheObject, source: &Path) -> StoreResult<LinkType> {
        obj.put(source, self.config.checksum_save)
    }

    /// Load `obj` into `dest`, verifying when `checksum_load` is set.
    pub fn load(&self, obj: &mut CacheObject, dest: &Path) -> StoreResult<LinkType> {
        obj.get(dest, self.config.checksum_load)
    }

    /// Unlink `obj` and drop the handle.
    pub fn remove(&self, mut obj: CacheObject) -> StoreResult<bool> {
        obj.unlink()
    }

    /// Every well-formed object in the cache, optionally of one algorithm,
    /// sorted by key.
    ///
    /// Files that do not fit the layout are skipped; see
    /// [`stray_paths`](Self::stray_paths).
    pub fn list(&self, filter: Option<ChecksumType>) -> StoreResult<Vec<CacheObject>> {
        let mut objects = Vec::new();
        for checksum_type in self.type_dirs(filter) {
            let dir = path::type_dir(&self.root, checksum_type);
            for entry in WalkDir::new(&dir).min_depth(2).max_depth(2) {
                let entry = entry.map_err(io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(key) = path::parse_object_path(&self.root, entry.path()) {
                    objects.push(self.object_for(key));
                }
            }
        }
        objects.sort();
        Ok(objects)
    }

    /// Paths inside the algorithm directories that do not fit the layout.
    ///
    /// That covers shard directories with a bad name, anything in a shard that
    /// is not a regular file named by a valid digest starting with the shard,
    /// and leftover temp files. A stray directory is reported once and not
    /// descended into.
    pub fn stray_paths(&self) -> StoreResult<Vec<PathBuf>> {
        let mut strays = Vec::new();
        for checksum_type in self.type_dirs(None) {
            let dir = path::type_dir(&self.root, checksum_type);
            let mut walk = WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(2)
                .sort_by_file_name()
                .into_iter();
            while let Some(entry) = walk.next() {
                let entry = entry.map_err(io::Error::from)?;
                let is_dir = entry.file_type().is_dir();
                let fits = if entry.depth() == 1 {
                    is_dir && entry.file_name().to_str().is_some_and(path::is_shard_name)
                } else {
                    entry.file_type().is_file()
                        && path::parse_object_path(&self.root, entry.path()).is_some()
                };
                if !fits {
                    if is_dir {
                        walk.skip_current_dir();
                    }
                    strays.push(entry.into_path());
                }
            }
        }
        Ok(strays)
    }

    /// Delete every stray path (directories recursively) and prune shard
    /// directories left empty. Returns what was removed.
    pub fn remove_stray(&self) -> StoreResult<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for stray in self.stray_paths()? {
            let meta = match fs::symlink_metadata(&stray) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let result = if meta.is_dir() {
                fs::remove_dir_all(&stray)
            } else {
                fs::remove_file(&stray)
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
            info!(path = %stray.display(), "stray path removed");

            if let Some(shard) = stray.parent().filter(|p| self.is_shard_dir(p)) {
                remove_dir_if_empty(shard)?;
            }
            removed.push(stray);
        }
        Ok(removed)
    }

    fn type_dirs(&self, filter: Option<ChecksumType>) -> impl Iterator<Item = ChecksumType> + '_ {
        ChecksumType::ALL
            .into_iter()
            .filter(move |ty| filter.map_or(true, |f| f == *ty))
            .filter(move |ty| path::type_dir(&self.root, *ty).is_dir())
    }

    fn is_shard_dir(&self, dir: &Path) -> bool {
        dir.strip_prefix(&self.root)
            .map(|rel| rel.components().count() == 2)
            .unwrap_or(false)
    }
}
