use cashe_types::ChecksumType;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// Streaming checksum session for one algorithm.
///
/// Feed data with [`update`](Self::update) as many times as needed, then call
/// [`finalize`](Self::finalize) to get the lowercase hex digest. Dropping the
/// session releases it.
#[derive(Clone)]
pub enum Checksum {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Checksum {
    /// Start a session for the given algorithm.
    pub fn new(checksum_type: ChecksumType) -> Self {
        match checksum_type {
            ChecksumType::Md5 => Self::Md5(Md5::new()),
            ChecksumType::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumType::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumType::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Start a session by algorithm name. Returns `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        ChecksumType::from_name(name).map(Self::new)
    }

    /// The algorithm this session computes.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha1(_) => ChecksumType::Sha1,
            Self::Sha256(_) => ChecksumType::Sha256,
            Self::Sha512(_) => ChecksumType::Sha512,
        }
    }

    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Consume the session and return the lowercase hex digest.
    pub fn finalize(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

impl std::fmt::Debug for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Checksum")
            .field(&self.checksum_type())
            .finish()
    }
}

/// One-shot hex digest of an in-memory buffer.
pub fn hex_digest(checksum_type: ChecksumType, data: &[u8]) -> String {
    let mut checksum = Checksum::new(checksum_type);
    checksum.update(data);
    checksum.finalize()
}
