//! Peer capability flags.
//!
//! Internally a plain struct of booleans. The wire form is a four-character
//! bitfield in the enhanced base64 alphabet, six bits per character, with
//! bit 0 in the lowest bit of the first character.

use crate::hash::{decode_char, encode_char};

const BITFIELD_CHARS: usize = 4;

const BIT_DIRECT_CONNECT: usize = 0;
const BIT_ACCEPT_REMOTE_CRAWL: usize = 1;
const BIT_ACCEPT_REMOTE_INDEX: usize = 2;
const BIT_ROOT_NODE: usize = 3;
const BIT_SSL_AVAILABLE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flags {
    /// The peer was reached directly, not only through gossip.
    pub direct_connect: bool,
    pub accept_remote_crawl: bool,
    /// The peer takes part in the word index DHT.
    pub accept_remote_index: bool,
    pub root_node: bool,
    pub ssl_available: bool,
    /// Full-text queries are answered. Not part of the bitfield.
    pub solr_available: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            direct_connect: false,
            accept_remote_crawl: false,
            accept_remote_index: true,
            root_node: false,
            ssl_available: false,
            solr_available: true,
        }
    }
}

impl Flags {
    fn bits(&self) -> [(usize, bool); 5] {
        [
            (BIT_DIRECT_CONNECT, self.direct_connect),
            (BIT_ACCEPT_REMOTE_CRAWL, self.accept_remote_crawl),
            (BIT_ACCEPT_REMOTE_INDEX, self.accept_remote_index),
            (BIT_ROOT_NODE, self.root_node),
            (BIT_SSL_AVAILABLE, self.ssl_available),
        ]
    }

    pub fn to_bitfield(&self) -> String {
        let mut chars = [0u8; BITFIELD_CHARS];
        for (bit, set) in self.bits() {
            if set {
                chars[bit / 6] |= 1 << (bit % 6);
            }
        }
        chars.iter().map(|&v| encode_char(v) as char).collect()
    }

    /// Decode a bitfield. Unknown characters read as zero; bits beyond the
    /// known set are ignored. `solr_available` keeps its default.
    pub fn from_bitfield(s: &str) -> Self {
        let mut chars = [0u8; BITFIELD_CHARS];
        for (i, b) in s.bytes().take(BITFIELD_CHARS).enumerate() {
            chars[i] = decode_char(b).unwrap_or(0);
        }
        let bit = |n: usize| chars[n / 6] & (1 << (n % 6)) != 0;
        Self {
            direct_connect: bit(BIT_DIRECT_CONNECT),
            accept_remote_crawl: bit(BIT_ACCEPT_REMOTE_CRAWL),
            accept_remote_index: bit(BIT_ACCEPT_REMOTE_INDEX),
            root_node: bit(BIT_ROOT_NODE),
            ssl_available: bit(BIT_SSL_AVAILABLE),
            solr_available: true,
        }
    }
}
