//! Content-addressed file cache.
//!
//! Files are stored under a path derived from their checksum:
//! `root/<algorithm>/<first 4 digest chars>/<digest>`. Presence on disk is
//! the only record an object exists; there is no index.
//!
//! # Guarantees
//!
//! 1. Readers never observe a partially written object. Every write lands in
//!    a temp file in the final directory and is renamed into place.
//! 2. Hardlinking is an optimisation. When a link cannot cross filesystems
//!    (or the link count is exhausted) the data is copied instead.
//! 3. Optional verification re-digests the object and never leaves a
//!    mismatching file behind under a key.
//!
//! # Entry points
//!
//! - [`Store`] -- opened cache root plus policy ([`StoreConfig`])
//! - [`CacheObject`] -- save/load/unlink/verify for one key
//! - [`atomic`] -- link-or-copy, atomic copy and file digest primitives

pub mod atomic;
pub mod config;
pub mod error;
pub mod object;
pub mod path;
pub mod stat;
pub mod store;

pub use atomic::{copy_atomic, file_to_hex_digest, link_or_fallback, LinkType};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use object::CacheObject;
pub use stat::StatCache;
pub use store::Store;
