//! Twelve-character identifiers in the enhanced base64 alphabet.
//!
//! Peers, words and urls are all addressed by the same kind of hash: twelve
//! characters drawn from `A-Z a-z 0-9 - _`, six bits each. Hashes order by
//! the alphabet (not by ASCII), which is the order of their ring positions.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Length of every hash, in characters.
pub const HASH_LEN: usize = 12;

/// Digest bytes that fill a hash.
const DIGEST_PREFIX: usize = HASH_LEN / 4 * 3;

/// The enhanced base64 alphabet, in collation order.
pub const ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Six-bit value of an alphabet character.
pub fn decode_char(c: u8) -> Option<u8> {
    match c {
        b'A'..=b'Z' => Some(c - b'A'),
        b'a'..=b'z' => Some(c - b'a' + 26),
        b'0'..=b'9' => Some(c - b'0' + 52),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// Alphabet character for the low six bits of `v`.
pub fn encode_char(v: u8) -> u8 {
    ALPHABET[(v & 0x3f) as usize]
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("wrong hash length ({0})")]
    Length(usize),
    #[error("invalid hash character {0:?}")]
    Character(char),
}

/// A twelve-character hash. Always well-formed once constructed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; HASH_LEN]);

/// Identity of a peer.
pub type PeerId = Hash;
/// Hash of a search word; the DHT key of a query.
pub type WordHash = Hash;
/// Hash of a document url.
pub type UrlHash = Hash;

impl Hash {
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let bytes = s.as_bytes();
        if bytes.len() != HASH_LEN {
            return Err(HashError::Length(s.chars().count()));
        }
        let mut out = [0u8; HASH_LEN];
        for (i, &b) in bytes.iter().enumerate() {
            if decode_char(b).is_none() {
                return Err(HashError::Character(b as char));
            }
            out[i] = b;
        }
        Ok(Self(out))
    }

    /// Encode the first nine bytes of a blake3 digest.
    pub fn from_digest(digest: &[u8; blake3::OUT_LEN]) -> Self {
        let mut out = [0u8; HASH_LEN];
        // nine bytes are exactly twelve characters
        let _ = URL_SAFE_NO_PAD.encode_slice(&digest[..DIGEST_PREFIX], &mut out);
        Self(out)
    }

    /// blake3-derived hash of arbitrary content.
    pub fn of(data: &[u8]) -> Self {
        Self::from_digest(blake3::hash(data).as_bytes())
    }

    /// Word hash for a query term. Terms are case-folded first.
    pub fn of_word(word: &str) -> Self {
        Self::of(word.trim().to_lowercase().as_bytes())
    }

    /// Fresh random hash.
    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::of(&seed)
    }

    /// Join the first `n` characters of `head` with the rest of `tail`.
    pub fn splice(head: &Hash, tail: &Hash, n: usize) -> Self {
        let n = n.min(HASH_LEN);
        let mut out = tail.0;
        out[..n].copy_from_slice(&head.0[..n]);
        Self(out)
    }

    pub(crate) fn from_raw(raw: [u8; HASH_LEN]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // every byte is from ALPHABET
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.as_str())
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> Ordering {
        let digits = |h: &Hash| h.0.map(|c| decode_char(c).unwrap_or(0));
        digits(self).cmp(&digits(other))
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Hash::parse(&s).map_err(serde::de::Error::custom)
    }
}
