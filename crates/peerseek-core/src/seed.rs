//! Seed strings: the textual form of a peer record.
//!
//! A seed is a `{Key=value,...}` map. It travels wrapped in a one-letter
//! prefix: `p|` carries the map as plain text (used on disk), `b|` carries it
//! in the enhanced base64 alphabet (used on the wire).

use std::collections::BTreeMap;
use std::net::IpAddr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::flags::Flags;
use crate::hash::{Hash, HashError};
use crate::record::{sanitize_tag, Counters, PeerRecord, PeerType};

/// Largest encoded seed accepted from the network.
pub const MAX_SEED_SIZE: usize = 16_000;

const DATE_FORMAT: &str = "%Y%m%d%H%M%S";

// field names
const HASH: &str = "Hash";
const NAME: &str = "Name";
const PEER_TYPE: &str = "PeerType";
const LAST_SEEN: &str = "LastSeen";
const BIRTH: &str = "BDate";
const IP: &str = "IP";
const IP6: &str = "IP6";
const PORT: &str = "Port";
const FLAGS: &str = "Flags";
const SOLR: &str = "Solr";
const VERSION: &str = "Version";
const WORD_COUNT: &str = "ICount";
const LINK_COUNT: &str = "LCount";
const INDEX_SENT: &str = "sI";
const INDEX_RECEIVED: &str = "rI";
const URL_SENT: &str = "sU";
const URL_RECEIVED: &str = "rU";
const TAGS: &str = "Tags";
const SEED_URL: &str = "seedURL";
const DISCONNECTED: &str = "dct";

#[derive(Debug, thiserror::Error)]
pub enum SeedCodecError {
    #[error("empty seed")]
    Empty,
    #[error("seed of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("unknown seed encoding {0:?}")]
    UnknownEncoding(String),
    #[error("seed is not valid text")]
    NotText,
    #[error("malformed seed map")]
    Malformed,
    #[error("seed has no hash")]
    NoHash,
    #[error("bad hash: {0}")]
    Hash(#[from] HashError),
    #[error("unknown peer type {0:?}")]
    PeerType(String),
    #[error("bad address {0:?}")]
    Address(String),
    #[error("bad value for {field}: {value:?}")]
    Value { field: &'static str, value: String },
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// The `{Key=value,...}` form.
pub fn to_map_string(record: &PeerRecord) -> String {
    let mut map: BTreeMap<&'static str, String> = BTreeMap::new();
    map.insert(HASH, record.id.to_string());
    map.insert(NAME, record.name().to_string());
    map.insert(PEER_TYPE, record.peer_type.as_str().to_string());
    map.insert(LAST_SEEN, format_date(record.last_seen));
    map.insert(BIRTH, format_date(record.birth()));
    if let Some(ip) = record.primary_address() {
        map.insert(IP, ip.to_string());
    }
    let secondary: Vec<String> = record
        .addresses()
        .into_iter()
        .skip(usize::from(record.primary_address().is_some()))
        .map(|ip| ip.to_string())
        .collect();
    if !secondary.is_empty() {
        map.insert(IP6, secondary.join("|"));
    }
    map.insert(PORT, record.port.to_string());
    map.insert(FLAGS, record.flags.to_bitfield());
    map.insert(SOLR, if record.flags.solr_available { "OK" } else { "NA" }.to_string());
    map.insert(VERSION, record.version.clone());
    map.insert(WORD_COUNT, record.word_count.to_string());
    map.insert(LINK_COUNT, record.link_count.to_string());
    let c = record.counters();
    map.insert(INDEX_SENT, c.index_sent.to_string());
    map.insert(INDEX_RECEIVED, c.index_received.to_string());
    map.insert(URL_SENT, c.url_sent.to_string());
    map.insert(URL_RECEIVED, c.url_received.to_string());
    if !record.tags.is_empty() {
        let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
        map.insert(TAGS, tags.join("|"));
    }
    if let Some(url) = &record.seed_url {
        map.insert(SEED_URL, url.clone());
    }
    if let Some(dct) = record.last_disconnect {
        map.insert(DISCONNECTED, format_date(dct));
    }

    let body: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{{{}}}", body.join(","))
}

/// Wire form: `b|` + enhanced base64.
pub fn encode(record: &PeerRecord) -> String {
    format!("b|{}", URL_SAFE_NO_PAD.encode(to_map_string(record)))
}

/// Storage form: `p|` + plain map.
pub fn encode_plain(record: &PeerRecord) -> String {
    format!("p|{}", to_map_string(record))
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode a wrapped seed. The record is not validated.
pub fn decode(seed: &str) -> Result<PeerRecord, SeedCodecError> {
    let seed = seed.trim();
    if seed.is_empty() {
        return Err(SeedCodecError::Empty);
    }
    if seed.len() > MAX_SEED_SIZE {
        return Err(SeedCodecError::TooLarge(seed.len()));
    }
    let (kind, body) = seed
        .split_once('|')
        .ok_or_else(|| SeedCodecError::UnknownEncoding(String::new()))?;
    let text = match kind {
        "p" => body.to_string(),
        "b" => {
            let bytes = URL_SAFE_NO_PAD.decode(body).map_err(|_| SeedCodecError::NotText)?;
            String::from_utf8(bytes).map_err(|_| SeedCodecError::NotText)?
        }
        other => return Err(SeedCodecError::UnknownEncoding(other.to_string())),
    };
    from_map_string(&text)
}

/// Parse the `{Key=value,...}` form.
pub fn from_map_string(text: &str) -> Result<PeerRecord, SeedCodecError> {
    let inner = text
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or(SeedCodecError::Malformed)?;
    let mut map: BTreeMap<&str, &str> = BTreeMap::new();
    for pair in inner.split(',').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').ok_or(SeedCodecError::Malformed)?;
        map.insert(k.trim(), v.trim());
    }

    let id = Hash::parse(map.get(HASH).ok_or(SeedCodecError::NoHash)?)?;
    let peer_type = match map.get(PEER_TYPE) {
        Some(s) => PeerType::parse(s).ok_or_else(|| SeedCodecError::PeerType(s.to_string()))?,
        None => PeerType::Virgin,
    };
    let last_seen = required_date(&map, LAST_SEEN)?;
    let mut record = PeerRecord::new(id, map.get(NAME).copied().unwrap_or_default(), peer_type, last_seen);
    record.set_birth(optional_date(&map, BIRTH)?.unwrap_or(last_seen));

    if let Some(ip) = map.get(IP).filter(|s| !s.is_empty()) {
        record.add_address(parse_ip(ip)?);
    }
    if let Some(list) = map.get(IP6) {
        for ip in list.split('|').filter(|s| !s.is_empty()) {
            record.add_address(parse_ip(ip)?);
        }
    }
    record.port = number(&map, PORT)?.unwrap_or(0);

    let mut flags = map.get(FLAGS).map(|s| Flags::from_bitfield(s)).unwrap_or_default();
    flags.solr_available = map.get(SOLR).map_or(true, |s| *s != "NA");
    record.flags = flags;

    if let Some(v) = map.get(VERSION) {
        record.version = v.to_string();
    }
    record.word_count = number(&map, WORD_COUNT)?.unwrap_or(0);
    record.link_count = number(&map, LINK_COUNT)?.unwrap_or(0);
    record.set_counters(Counters {
        index_sent: number(&map, INDEX_SENT)?.unwrap_or(0),
        index_received: number(&map, INDEX_RECEIVED)?.unwrap_or(0),
        url_sent: number(&map, URL_SENT)?.unwrap_or(0),
        url_received: number(&map, URL_RECEIVED)?.unwrap_or(0),
    });
    if let Some(tags) = map.get(TAGS) {
        record.tags = tags
            .split('|')
            .filter(|t| !t.is_empty())
            .map(sanitize_tag)
            .collect();
    }
    record.seed_url = map.get(SEED_URL).filter(|s| !s.is_empty()).map(|s| s.to_string());
    record.last_disconnect = optional_date(&map, DISCONNECTED)?;
    Ok(record)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn format_date(d: DateTime<Utc>) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn parse_date(field: &'static str, s: &str) -> Result<DateTime<Utc>, SeedCodecError> {
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .map(|n| n.and_utc())
        .map_err(|_| SeedCodecError::Value {
            field,
            value: s.to_string(),
        })
}

fn required_date(map: &BTreeMap<&str, &str>, field: &'static str) -> Result<DateTime<Utc>, SeedCodecError> {
    match map.get(field) {
        Some(s) => parse_date(field, s),
        None => Err(SeedCodecError::Value {
            field,
            value: String::new(),
        }),
    }
}

fn optional_date(map: &BTreeMap<&str, &str>, field: &'static str) -> Result<Option<DateTime<Utc>>, SeedCodecError> {
    map.get(field)
        .filter(|s| !s.is_empty())
        .map(|s| parse_date(field, s))
        .transpose()
}

fn number<T: std::str::FromStr>(map: &BTreeMap<&str, &str>, field: &'static str) -> Result<Option<T>, SeedCodecError> {
    map.get(field)
        .map(|s| {
            s.parse::<T>().map_err(|_| SeedCodecError::Value {
                field,
                value: s.to_string(),
            })
        })
        .transpose()
}

fn parse_ip(s: &str) -> Result<IpAddr, SeedCodecError> {
    s.parse().map_err(|_| SeedCodecError::Address(s.to_string()))
}
