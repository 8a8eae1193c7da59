//! Foundation types for cashe.
//!
//! This crate provides the identity types shared by every other cashe crate.
//! An object in the cache is identified solely by the checksum of its
//! content, so the identity is just an algorithm plus a hex digest.
//!
//! # Key Types
//!
//! - [`ChecksumType`] -- One of the supported digest algorithms (md5, sha1, sha256, sha512)
//! - [`ObjectKey`] -- Validated `(checksum_type, checksum_data)` pair identifying a cached object

pub mod checksum_type;
pub mod error;
pub mod key;

pub use checksum_type::ChecksumType;
pub use error::TypeError;
pub use key::{is_hex_digest, ObjectKey};
