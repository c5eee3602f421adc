use crate::item::Representations;
use blake3::Hasher;
use std::fmt;

const DOMAIN: &[u8] = b"clipstack-fingerprint-v1|";

/// Content identity of a clipboard payload: BLAKE3 over its representation set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        blake3::Hash::from_hex(hex).ok().map(|h| Self(*h.as_bytes()))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Each representation is hashed with its length-prefixed tag, then the
/// per-representation digests are sorted so the result does not depend on
/// the order types were offered in.
pub fn fingerprint(representations: &Representations) -> Fingerprint {
    let mut digests: Vec<[u8; 32]> = representations
        .iter()
        .map(|(kind, bytes)| {
            let tag = kind.tag().as_bytes();
            let mut hasher = Hasher::new();
            hasher.update(&(tag.len() as u64).to_le_bytes());
            hasher.update(tag);
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
            *hasher.finalize().as_bytes()
        })
        .collect();

    digests.sort_unstable();

    let mut hasher = Hasher::new();
    hasher.update(DOMAIN);
    for digest in &digests {
        hasher.update(digest);
    }
    Fingerprint(*hasher.finalize().as_bytes())
}
