//! Digest provider for cashe.
//!
//! Wraps the RustCrypto hash implementations behind a single streaming
//! session type, [`Checksum`], that yields lowercase hex digests. The store
//! only ever needs `update` and `finalize`; no custom cryptography lives here.

pub mod checksum;

pub use checksum::{hex_digest, Checksum};
