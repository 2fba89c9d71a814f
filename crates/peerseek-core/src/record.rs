//! Peer records: what the network knows about one participant.
//!
//! A record is created locally at first start or received through gossip.
//! Every received record is validated before it may touch the registry, and
//! two views of the same peer are reconciled with [`PeerRecord::merge`].

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::flags::Flags;
use crate::hash::PeerId;

/// Incoming timestamps may run ahead of our clock by this much.
pub const FUTURE_TOLERANCE_SECS: i64 = 5 * 60;
/// Records last seen longer ago than this are not worth connecting.
pub const MAX_GOSSIP_AGE_SECS: i64 = 24 * 60 * 60;
/// Gossip older than this clears the direct-connect flag.
pub const DIRECT_WINDOW_SECS: i64 = 2 * 60;

const MAX_NAME_LEN: usize = 80;

// ── Peer type ─────────────────────────────────────────────────────────────────

/// Capability tier. Senior and principal peers are equal for connection
/// purposes; only they answer remote searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerType {
    Virgin,
    Junior,
    Senior,
    Principal,
}

impl PeerType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "virgin" => Some(Self::Virgin),
            "junior" => Some(Self::Junior),
            "senior" => Some(Self::Senior),
            "principal" => Some(Self::Principal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Virgin => "virgin",
            Self::Junior => "junior",
            Self::Senior => "senior",
            Self::Principal => "principal",
        }
    }

    /// Ordering tier: virgin < junior < senior == principal.
    pub fn tier(&self) -> u8 {
        match self {
            Self::Virgin => 0,
            Self::Junior => 1,
            Self::Senior | Self::Principal => 2,
        }
    }

    /// May enter the connected partition.
    pub fn is_qualified(&self) -> bool {
        self.tier() >= Self::Senior.tier()
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Counters ──────────────────────────────────────────────────────────────────

/// Traffic counters. Only ever grow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub index_sent: u64,
    pub index_received: u64,
    pub url_sent: u64,
    pub url_received: u64,
}

impl Counters {
    fn saturating_add(self, d: Counters) -> Self {
        Self {
            index_sent: self.index_sent.saturating_add(d.index_sent),
            index_received: self.index_received.saturating_add(d.index_received),
            url_sent: self.url_sent.saturating_add(d.url_sent),
            url_received: self.url_received.saturating_add(d.url_received),
        }
    }

    fn max(self, o: Counters) -> Self {
        Self {
            index_sent: self.index_sent.max(o.index_sent),
            index_received: self.index_received.max(o.index_received),
            url_sent: self.url_sent.max(o.url_sent),
            url_received: self.url_received.max(o.url_received),
        }
    }
}

// ── Network mode ──────────────────────────────────────────────────────────────

/// Which addresses a peer may advertise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Public network: loopback, unspecified and multicast addresses rejected.
    #[default]
    Global,
    /// Private network: only local addresses accepted.
    Intranet,
    /// Anything that parses.
    All,
}

impl NetworkMode {
    pub fn accepts(&self, ip: &IpAddr) -> bool {
        match self {
            Self::All => true,
            Self::Intranet => is_local(ip),
            Self::Global => !(ip.is_unspecified() || ip.is_loopback() || ip.is_multicast() || is_broadcast(ip)),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Intranet => "intranet",
            Self::All => "all",
        };
        f.write_str(s)
    }
}

fn is_broadcast(ip: &IpAddr) -> bool {
    matches!(ip, IpAddr::V4(v4) if v4.is_broadcast())
}

/// Loopback, private, link-local or unique-local.
pub fn is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no peer name given")]
    NoName,
    #[error("no address given")]
    NoAddress,
    #[error("address {addr} rejected in {mode} mode")]
    Address { addr: IpAddr, mode: NetworkMode },
    #[error("port 0 is not reachable")]
    Port,
    #[error("wrong protocol for seed url")]
    SeedUrlScheme,
    #[error("seed url malformed")]
    SeedUrlMalformed,
    #[error("seed url in local network rejected: {0}")]
    SeedUrlLocal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeRejection {
    #[error("peer type {0} not qualified for connection")]
    NotQualified(PeerType),
    #[error("last seen {age_secs}s ago")]
    TooOld { age_secs: i64 },
    #[error("gossip is older than the stored record")]
    Stale,
}

/// How a record reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    /// The peer itself answered or called.
    Direct,
    /// Relayed by a third peer.
    Gossip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Accepted,
    Rejected(MergeRejection),
}

// ── Record ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    name: String,
    primary: Option<IpAddr>,
    secondary: Vec<IpAddr>,
    pub port: u16,
    pub peer_type: PeerType,
    pub last_seen: DateTime<Utc>,
    birth: DateTime<Utc>,
    pub flags: Flags,
    counters: Counters,
    pub version: String,
    /// Number of indexed words; a capacity hint.
    pub word_count: u64,
    /// Number of stored documents; a capacity hint.
    pub link_count: u64,
    /// Topics of a peer that only indexes some subjects.
    pub tags: BTreeSet<String>,
    pub seed_url: Option<String>,
    /// Set by the registry when the peer left the connected partition.
    pub last_disconnect: Option<DateTime<Utc>>,
}

impl PeerRecord {
    pub fn new(id: PeerId, name: &str, peer_type: PeerType, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id,
            name: String::new(),
            primary: None,
            secondary: Vec::new(),
            port: 0,
            peer_type,
            last_seen: now,
            birth: now,
            flags: Flags::default(),
            counters: Counters::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            word_count: 0,
            link_count: 0,
            tags: BTreeSet::new(),
            seed_url: None,
            last_disconnect: None,
        };
        record.set_name(name);
        record
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the display name. Markup and seed separators become `_`.
    pub fn set_name(&mut self, name: &str) {
        self.name = sanitize(name);
    }

    pub fn birth(&self) -> DateTime<Utc> {
        self.birth
    }

    pub(crate) fn set_birth(&mut self, birth: DateTime<Utc>) {
        self.birth = birth;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub(crate) fn set_counters(&mut self, counters: Counters) {
        self.counters = counters;
    }

    pub fn add_traffic(&mut self, delta: Counters) {
        self.counters = self.counters.saturating_add(delta);
    }

    /// Days since birth.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.birth).num_days()
    }

    pub fn seen_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_seen <= window
    }

    /// True when any of the tags hashes to one of `words`.
    pub fn matches_tags(&self, words: &[crate::hash::WordHash]) -> bool {
        self.tags
            .iter()
            .any(|t| words.contains(&crate::hash::Hash::of_word(t)))
    }

    // ── Addresses ──

    /// Record an address.
    ///
    /// The first address fills the primary slot whatever its family. After
    /// that IPv4 replaces the primary (moving an IPv6 primary aside) and
    /// IPv6 accumulates in the secondary set.
    pub fn add_address(&mut self, ip: IpAddr) {
        if self.has_address(&ip) {
            return;
        }
        match self.primary {
            None => self.primary = Some(ip),
            Some(current) if ip.is_ipv4() => {
                if current.is_ipv6() {
                    self.secondary.push(current);
                }
                self.primary = Some(ip);
            }
            Some(_) => self.secondary.push(ip),
        }
    }

    pub fn set_addresses<I: IntoIterator<Item = IpAddr>>(&mut self, ips: I) {
        self.primary = None;
        self.secondary.clear();
        for ip in ips {
            self.add_address(ip);
        }
    }

    /// Primary address first, then the secondary set in insertion order.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .copied()
            .collect()
    }

    pub fn primary_address(&self) -> Option<IpAddr> {
        self.primary
    }

    pub fn has_address(&self, ip: &IpAddr) -> bool {
        self.primary.as_ref() == Some(ip) || self.secondary.contains(ip)
    }

    /// Forget one address. A secondary address is promoted when the primary
    /// goes. Returns false if the address was not recorded.
    pub fn remove_address(&mut self, ip: &IpAddr) -> bool {
        if self.primary.as_ref() == Some(ip) {
            self.primary = if self.secondary.is_empty() {
                None
            } else {
                Some(self.secondary.remove(0))
            };
            return true;
        }
        let before = self.secondary.len();
        self.secondary.retain(|a| a != ip);
        before != self.secondary.len()
    }

    pub fn clashes(&self, ips: &[IpAddr]) -> bool {
        ips.iter().any(|ip| self.has_address(ip))
    }

    // ── Validation ──

    /// Check the record is fit for the registry. Address checks are skipped
    /// for our own record, which may not know its public address yet.
    pub fn validate(&self, is_self: bool, mode: NetworkMode) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::NoName);
        }
        if !is_self {
            let addrs = self.addresses();
            if addrs.is_empty() {
                return Err(ValidationError::NoAddress);
            }
            if let Some(bad) = addrs.iter().find(|a| !mode.accepts(a)) {
                return Err(ValidationError::Address { addr: *bad, mode });
            }
            if self.port == 0 {
                return Err(ValidationError::Port);
            }
        }
        if let Some(url) = self.seed_url.as_deref().filter(|u| !u.is_empty()) {
            check_seed_url(url)?;
        }
        Ok(())
    }

    // ── Merge ──

    /// Prepare a received record for storage.
    ///
    /// Future timestamps are clamped to `now`. Direct contact stamps
    /// `last_seen` and sets the direct-connect flag. Gossip older than a day
    /// is refused, and gossip older than a few minutes clears the flag.
    pub fn admit(mut self, contact: Contact, now: DateTime<Utc>) -> Result<Self, MergeRejection> {
        if !self.peer_type.is_qualified() {
            return Err(MergeRejection::NotQualified(self.peer_type));
        }
        if self.last_seen > now + Duration::seconds(FUTURE_TOLERANCE_SECS) {
            self.last_seen = now;
        }
        match contact {
            Contact::Direct => {
                self.last_seen = now;
                self.flags.direct_connect = true;
            }
            Contact::Gossip => {
                let age = now - self.last_seen;
                if age > Duration::seconds(MAX_GOSSIP_AGE_SECS) {
                    return Err(MergeRejection::TooOld {
                        age_secs: age.num_seconds(),
                    });
                }
                if age > Duration::seconds(DIRECT_WINDOW_SECS) {
                    self.flags.direct_connect = false;
                }
            }
        }
        Ok(self)
    }

    /// Reconcile `incoming` into this record. Direct contact always wins;
    /// gossip only wins when it is at least as fresh as what we hold.
    pub fn merge(&mut self, incoming: PeerRecord, contact: Contact, now: DateTime<Utc>) -> MergeOutcome {
        let incoming = match incoming.admit(contact, now) {
            Ok(r) => r,
            Err(e) => return MergeOutcome::Rejected(e),
        };
        if contact == Contact::Gossip && incoming.last_seen < self.last_seen {
            return MergeOutcome::Rejected(MergeRejection::Stale);
        }
        self.absorb(incoming);
        MergeOutcome::Accepted
    }

    /// Take every mutable attribute from `other` unconditionally. Birth and
    /// disconnect time stay; counters keep their maximum.
    pub fn absorb(&mut self, other: PeerRecord) {
        self.name = other.name;
        self.primary = other.primary;
        self.secondary = other.secondary;
        self.port = other.port;
        self.peer_type = other.peer_type;
        self.last_seen = other.last_seen;
        self.flags = other.flags;
        self.counters = self.counters.max(other.counters);
        self.version = other.version;
        self.word_count = other.word_count;
        self.link_count = other.link_count;
        self.tags = other.tags;
        self.seed_url = other.seed_url;
    }
}

fn sanitize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ',' | '=' | '{' | '}' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_NAME_LEN)
        .collect()
}

pub(crate) fn sanitize_tag(s: &str) -> String {
    sanitize(s).to_lowercase()
}

fn check_seed_url(url: &str) -> Result<(), ValidationError> {
    let parsed = Url::parse(url).map_err(|_| ValidationError::SeedUrlMalformed)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::SeedUrlScheme);
    }
    let host = parsed.host().ok_or(ValidationError::SeedUrlMalformed)?;
    let local = match &host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.');
            name == "localhost" || name.ends_with(".localhost") || name.ends_with(".local")
        }
        Host::Ipv4(v4) => v4.is_unspecified() || is_local(&IpAddr::V4(*v4)),
        Host::Ipv6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.is_unspecified() || is_local(&IpAddr::V4(v4)),
            None => v6.is_unspecified() || is_local(&IpAddr::V6(*v6)),
        },
    };
    if local {
        return Err(ValidationError::SeedUrlLocal(host.to_string()));
    }
    Ok(())
}

// ── Merge strategy ────────────────────────────────────────────────────────────

/// Decides how a received record combines with what the registry holds.
pub trait MergePolicy: Send + Sync {
    fn merge(
        &self,
        stored: Option<&PeerRecord>,
        incoming: PeerRecord,
        contact: Contact,
        now: DateTime<Utc>,
    ) -> Result<PeerRecord, MergeRejection>;
}

/// Direct contact wins, then the newer `last_seen`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NewestWinsPolicy;

impl MergePolicy for NewestWinsPolicy {
    fn merge(
        &self,
        stored: Option<&PeerRecord>,
        incoming: PeerRecord,
        contact: Contact,
        now: DateTime<Utc>,
    ) -> Result<PeerRecord, MergeRejection> {
        match stored {
            None => incoming.admit(contact, now),
            Some(stored) => {
                let mut merged = stored.clone();
                match merged.merge(incoming, contact, now) {
                    MergeOutcome::Accepted => Ok(merged),
                    MergeOutcome::Rejected(e) => Err(e),
                }
            }
        }
    }
}
