//! Peer protocol messages.
//!
//! Requests are URL-encoded forms, replies are JSON. Seeds travel in their
//! `b|` wire encoding so a reply can be re-gossiped untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use peerseek_core::{seed, Hash, PeerRecord, UrlHash, WordHash};

pub const PROTOCOL_VERSION: u32 = 1;

pub const PATH_HELLO: &str = "/peer/hello";
pub const PATH_SEARCH: &str = "/peer/search";

/// Replies above this size are dropped unread.
pub const MAX_RESPONSE_BYTES: usize = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    /// Word-hash lookup in the peer's reverse index.
    Index,
    /// Free-text query against the peer's document store.
    FullText,
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::FullText => "fulltext",
        }
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    pub version: u32,
    /// The responder's own seed.
    pub seed: String,
    /// Other peers the responder knows.
    #[serde(default)]
    pub seeds: Vec<String>,
    /// The caller's address as the responder saw it.
    #[serde(default)]
    pub your_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultItem {
    /// Claimed hash of `url`. Checked by the receiver.
    pub url_hash: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReply {
    pub version: u32,
    /// Id of the answering peer.
    pub responder: String,
    #[serde(default)]
    pub items: Vec<ResultItem>,
    /// Word histogram over the answered documents.
    #[serde(default)]
    pub topics: BTreeMap<String, u64>,
    #[serde(default)]
    pub seeds: Vec<String>,
}

// ── Request forms ─────────────────────────────────────────────────────────────

/// Decoded `/peer/hello` form.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloForm {
    pub version: u32,
    pub seed: String,
    #[serde(default)]
    pub count: usize,
}

/// Decoded `/peer/search` form.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchForm {
    pub version: u32,
    pub kind: SearchKind,
    /// Concatenated 12-character word hashes.
    #[serde(default)]
    pub words: String,
    /// Plain query text, full-text requests only.
    #[serde(default)]
    pub query: String,
    pub count: usize,
    /// Caller's seed, if it wants to be known.
    #[serde(default)]
    pub seed: Option<String>,
}

impl SearchForm {
    /// Word hashes in `words`. Malformed chunks are skipped.
    pub fn word_hashes(&self) -> Vec<WordHash> {
        self.words
            .as_bytes()
            .chunks(peerseek_core::HASH_LEN)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .filter_map(|s| Hash::parse(s).ok())
            .collect()
    }
}

pub fn hello_request(me: &PeerRecord, count: usize) -> Vec<(&'static str, String)> {
    vec![
        ("version", PROTOCOL_VERSION.to_string()),
        ("seed", seed::encode(me)),
        ("count", count.to_string()),
    ]
}

pub fn search_request(
    kind: SearchKind,
    words: &[WordHash],
    query: &str,
    count: usize,
    me: Option<&PeerRecord>,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("version", PROTOCOL_VERSION.to_string()),
        ("kind", kind.as_str().to_string()),
        ("words", words.iter().map(Hash::as_str).collect::<String>()),
        ("count", count.to_string()),
    ];
    if kind == SearchKind::FullText {
        form.push(("query", query.to_string()));
    }
    if let Some(me) = me {
        form.push(("seed", seed::encode(me)));
    }
    form
}

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("reply of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("protocol version {0} not supported")]
    Version(u32),
}

fn parse<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ProtocolError> {
    if body.len() > MAX_RESPONSE_BYTES {
        return Err(ProtocolError::TooLarge(body.len()));
    }
    serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn parse_search_reply(body: &[u8]) -> Result<SearchReply, ProtocolError> {
    let reply: SearchReply = parse(body)?;
    if reply.version != PROTOCOL_VERSION {
        return Err(ProtocolError::Version(reply.version));
    }
    Ok(reply)
}

pub fn parse_hello_reply(body: &[u8]) -> Result<HelloReply, ProtocolError> {
    let reply: HelloReply = parse(body)?;
    if reply.version != PROTOCOL_VERSION {
        return Err(ProtocolError::Version(reply.version));
    }
    Ok(reply)
}

/// Hash identifying a document by its URL.
pub fn url_hash(url: &str) -> UrlHash {
    Hash::of(url.as_bytes())
}
