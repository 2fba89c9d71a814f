//! Peer registry — every peer we know of and its connection state.
//!
//! Three partitions:
//! - Connected:    reachable senior/principal peers, used as search targets
//! - Disconnected: known, but the last contact failed or the peer left
//! - Potential:    junior/virgin peers, known but not serving searches
//!
//! A single map holds `(state, record)` per id, so a peer is in exactly one
//! partition and a reader never sees it between two. Writers are serialized
//! by one lock so that check-then-insert sequences (fraud detection, stale
//! gossip after a disconnect) are atomic. Reads never take that lock.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use peerseek_core::record::{Contact, Counters, MergePolicy, MergeRejection, NewestWinsPolicy};
use peerseek_core::{ring, seed, NetworkMode, PeerId, PeerRecord, PeerType, ValidationError};

use crate::events::PeerActionListener;

/// Partition a known peer lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Potential,
    Disconnected,
    Connected,
}

/// How a peer entered the connected partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Never seen before.
    New,
    /// Already connected; record refreshed.
    Updated,
    Reconnected,
    /// Was a junior in the potential partition.
    Promoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Connected(Arrival),
    Potential,
}

/// Result of losing one address of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceDeparture {
    /// Peer or address not known.
    Unknown,
    AddressRemoved { remaining: usize },
    /// That was the last address; the peer is now disconnected.
    Departed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectRejection {
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),
    #[error("record describes this peer")]
    SelfReference,
    #[error("peer type {0} not qualified for connection")]
    NotQualified(PeerType),
    #[error("address already claimed by {claimed_by}")]
    Fraud { claimed_by: PeerId },
    #[error("gossip predates the peer's disconnection")]
    StaleAfterDisconnect,
    #[error(transparent)]
    Merge(#[from] MergeRejection),
}

/// Connection statistics since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectStats {
    pub senior_connects: u64,
    pub principal_connects: u64,
    pub disconnects: u64,
}

#[derive(Debug, Default)]
struct Stats {
    senior_connects: AtomicU64,
    principal_connects: AtomicU64,
    disconnects: AtomicU64,
}

#[derive(Debug, Clone)]
struct Entry {
    state: PeerState,
    record: PeerRecord,
}

/// On-disk form of one registry entry.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEntry {
    state: PeerState,
    seed: String,
}

pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, Entry>>,
    writer: Arc<Mutex<()>>,
    me: Arc<RwLock<Option<PeerRecord>>>,
    stats: Arc<Stats>,
    listeners: Arc<RwLock<Vec<Arc<dyn PeerActionListener>>>>,
    policy: Arc<dyn MergePolicy>,
    mode: NetworkMode,
    persist_path: Arc<Option<PathBuf>>,
}

impl PeerRegistry {
    pub fn new(mode: NetworkMode) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            writer: Arc::new(Mutex::new(())),
            me: Arc::new(RwLock::new(None)),
            stats: Arc::new(Stats::default()),
            listeners: Arc::new(RwLock::new(Vec::new())),
            policy: Arc::new(NewestWinsPolicy),
            mode,
            persist_path: Arc::new(None),
        }
    }

    /// Create a registry backed by a snapshot file. Existing entries are
    /// loaded from disk if the file exists.
    pub fn with_persistence(mode: NetworkMode, path: PathBuf) -> Self {
        let registry = Self {
            persist_path: Arc::new(Some(path)),
            ..Self::new(mode)
        };
        registry.load_from_disk();
        registry
    }

    /// Replace the merge strategy.
    pub fn with_policy(mut self, policy: Arc<dyn MergePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn add_listener(&self, listener: Arc<dyn PeerActionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Own record ──

    pub fn set_my_seed(&self, record: PeerRecord) {
        *self.me.write().unwrap_or_else(PoisonError::into_inner) = Some(record);
    }

    pub fn my_seed(&self) -> Option<PeerRecord> {
        self.me.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn my_id(&self) -> Option<PeerId> {
        self.me
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.id)
    }

    /// Modify our own record in place. No-op before it is set.
    pub fn update_my_seed<F: FnOnce(&mut PeerRecord)>(&self, f: F) {
        if let Some(me) = self.me.write().unwrap_or_else(PoisonError::into_inner).as_mut() {
            f(me);
        }
    }

    // ── State transitions ──

    /// Admit a record into the connected partition.
    ///
    /// Runs validation, self and tier checks, fraud detection, the
    /// stale-after-disconnect check and the merge policy as one atomic step.
    pub fn connect_peer(
        &self,
        record: PeerRecord,
        contact: Contact,
        now: DateTime<Utc>,
    ) -> Result<Arrival, ConnectRejection> {
        let id = record.id;
        let result = self.try_connect(record, contact, now);
        match &result {
            Ok(arrival) => {
                tracing::debug!(peer = %id, ?arrival, ?contact, "peer connected");
                if *arrival != Arrival::Updated {
                    if let Some(r) = self.get(&id) {
                        self.notify_arrival(&r, contact);
                    }
                }
            }
            Err(e) => tracing::debug!(peer = %id, reason = %e, "peer record rejected"),
        }
        result
    }

    fn try_connect(
        &self,
        record: PeerRecord,
        contact: Contact,
        now: DateTime<Utc>,
    ) -> Result<Arrival, ConnectRejection> {
        record.validate(false, self.mode)?;
        if self.my_id() == Some(record.id) {
            return Err(ConnectRejection::SelfReference);
        }
        if !record.peer_type.is_qualified() {
            return Err(ConnectRejection::NotQualified(record.peer_type));
        }

        let _guard = self.lock();
        if let Some(claimed_by) = self.address_owner(&record) {
            return Err(ConnectRejection::Fraud { claimed_by });
        }
        let stored = self.peers.get(&record.id).map(|e| e.value().clone());
        if let Some(Entry {
            state: PeerState::Disconnected,
            record: ref old,
        }) = stored
        {
            let predates = old.last_disconnect.is_some_and(|dct| record.last_seen < dct);
            if contact == Contact::Gossip && predates {
                return Err(ConnectRejection::StaleAfterDisconnect);
            }
        }

        let merged = self
            .policy
            .merge(stored.as_ref().map(|e| &e.record), record, contact, now)?;
        let arrival = match stored.map(|e| e.state) {
            None => Arrival::New,
            Some(PeerState::Connected) => Arrival::Updated,
            Some(PeerState::Disconnected) => Arrival::Reconnected,
            Some(PeerState::Potential) => Arrival::Promoted,
        };
        if arrival != Arrival::Updated {
            let counter = match merged.peer_type {
                PeerType::Principal => &self.stats.principal_connects,
                _ => &self.stats.senior_connects,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        self.peers.insert(
            merged.id,
            Entry {
                state: PeerState::Connected,
                record: merged,
            },
        );
        Ok(arrival)
    }

    /// A connected peer other than `record.id` on the same address and port.
    fn address_owner(&self, record: &PeerRecord) -> Option<PeerId> {
        let addrs = record.addresses();
        self.peers
            .iter()
            .find(|e| {
                e.state == PeerState::Connected
                    && *e.key() != record.id
                    && e.record.port == record.port
                    && e.record.clashes(&addrs)
            })
            .map(|e| *e.key())
    }

    /// A peer contacted us directly. Juniors and virgins are kept as
    /// potential peers; qualified peers are connected.
    pub fn peer_ping(&self, mut record: PeerRecord, now: DateTime<Utc>) -> Result<PingOutcome, ConnectRejection> {
        if record.peer_type.is_qualified() {
            return self
                .connect_peer(record, Contact::Direct, now)
                .map(PingOutcome::Connected);
        }
        record.validate(false, self.mode)?;
        if self.my_id() == Some(record.id) {
            return Err(ConnectRejection::SelfReference);
        }
        record.last_seen = now;
        record.flags.direct_connect = true;

        let _guard = self.lock();
        let merged = match self.peers.get(&record.id).map(|e| e.record.clone()) {
            Some(mut stored) => {
                stored.absorb(record);
                stored
            }
            None => record,
        };
        tracing::debug!(peer = %merged.id, peer_type = %merged.peer_type, "potential peer pinged");
        self.peers.insert(
            merged.id,
            Entry {
                state: PeerState::Potential,
                record: merged,
            },
        );
        Ok(PingOutcome::Potential)
    }

    /// Move a connected peer to disconnected. Returns false if it was not
    /// connected.
    pub fn disconnect_peer(&self, id: &PeerId, now: DateTime<Utc>) -> bool {
        self.disconnect_locked(&self.lock(), id, now).is_some()
    }

    fn disconnect_locked(&self, _guard: &MutexGuard<'_, ()>, id: &PeerId, now: DateTime<Utc>) -> Option<PeerRecord> {
        let mut entry = self.peers.get_mut(id)?;
        if entry.state != PeerState::Connected {
            return None;
        }
        entry.state = PeerState::Disconnected;
        entry.record.last_disconnect = Some(now);
        self.stats.disconnects.fetch_add(1, Ordering::Relaxed);
        Some(entry.record.clone())
    }

    /// The peer is gone: it said goodbye, or every address failed.
    pub fn peer_departure(&self, id: &PeerId, reason: &str, now: DateTime<Utc>) -> bool {
        let departed = {
            let guard = self.lock();
            self.disconnect_locked(&guard, id, now)
        };
        match departed {
            Some(record) => {
                tracing::info!(peer = %id, name = record.name(), reason, "peer departed");
                self.notify_departure(&record, reason);
                true
            }
            None => false,
        }
    }

    /// One address of a peer stopped answering. The peer stays connected
    /// while it has other addresses.
    pub fn interface_departure(&self, id: &PeerId, ip: &IpAddr, now: DateTime<Utc>) -> InterfaceDeparture {
        let departed = {
            let guard = self.lock();
            let remaining = {
                let Some(mut entry) = self.peers.get_mut(id) else {
                    return InterfaceDeparture::Unknown;
                };
                if !entry.record.remove_address(ip) {
                    return InterfaceDeparture::Unknown;
                }
                entry.record.addresses().len()
            };
            tracing::debug!(peer = %id, addr = %ip, remaining, "peer address dropped");
            if remaining > 0 {
                return InterfaceDeparture::AddressRemoved { remaining };
            }
            match self.disconnect_locked(&guard, id, now) {
                Some(record) => record,
                None => return InterfaceDeparture::AddressRemoved { remaining: 0 },
            }
        };
        tracing::info!(peer = %id, addr = %ip, "last address failed, peer disconnected");
        self.notify_departure(&departed, "unreachable");
        InterfaceDeparture::Departed
    }

    /// Insert directly into a partition, bypassing admission rules.
    pub fn add_connected(&self, record: PeerRecord) {
        self.place(record, PeerState::Connected);
    }

    pub fn add_disconnected(&self, record: PeerRecord) {
        self.place(record, PeerState::Disconnected);
    }

    pub fn add_potential(&self, record: PeerRecord) {
        self.place(record, PeerState::Potential);
    }

    fn place(&self, record: PeerRecord, state: PeerState) {
        let _guard = self.lock();
        self.peers.insert(record.id, Entry { state, record });
    }

    // ── Record updates ──

    pub fn record_traffic(&self, id: &PeerId, delta: Counters) {
        self.modify(id, |r| r.add_traffic(delta));
    }

    pub fn set_ssl_available(&self, id: &PeerId, available: bool) {
        self.modify(id, |r| r.flags.ssl_available = available);
    }

    pub fn set_solr_available(&self, id: &PeerId, available: bool) {
        self.modify(id, |r| r.flags.solr_available = available);
    }

    fn modify<F: FnOnce(&mut PeerRecord)>(&self, id: &PeerId, f: F) {
        let _guard = self.lock();
        if let Some(mut entry) = self.peers.get_mut(id) {
            f(&mut entry.record);
        }
    }

    // ── Aging ──

    /// Disconnect connected peers not seen within `max_age`.
    pub fn age_out(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let departed: Vec<PeerRecord> = {
            let guard = self.lock();
            let stale: Vec<PeerId> = self
                .peers
                .iter()
                .filter(|e| e.state == PeerState::Connected && now - e.record.last_seen > max_age)
                .map(|e| *e.key())
                .collect();
            stale
                .iter()
                .filter_map(|id| self.disconnect_locked(&guard, id, now))
                .collect()
        };
        for record in &departed {
            self.notify_departure(record, "aged out");
        }
        departed.len()
    }

    /// Drop the peers disconnected longest ago beyond `max_entries`. Records
    /// without a disconnect time rank by `last_seen`.
    pub fn evict_disconnected(&self, max_entries: usize) -> usize {
        let _guard = self.lock();
        let mut disconnected: Vec<(DateTime<Utc>, PeerId)> = self
            .peers
            .iter()
            .filter(|e| e.state == PeerState::Disconnected)
            .map(|e| (e.record.last_disconnect.unwrap_or(e.record.last_seen), *e.key()))
            .collect();
        if disconnected.len() <= max_entries {
            return 0;
        }
        disconnected.sort();
        let excess = disconnected.len() - max_entries;
        for (_, id) in disconnected.iter().take(excess) {
            self.peers.remove(id);
        }
        excess
    }

    // ── Queries ──

    pub fn get(&self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.get(id).map(|e| e.record.clone())
    }

    pub fn state_of(&self, id: &PeerId) -> Option<PeerState> {
        self.peers.get(id).map(|e| e.state)
    }

    pub fn is_known(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn records_in(&self, state: PeerState) -> Vec<PeerRecord> {
        self.peers
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn connected(&self) -> Vec<PeerRecord> {
        self.records_in(PeerState::Connected)
    }

    pub fn disconnected(&self) -> Vec<PeerRecord> {
        self.records_in(PeerState::Disconnected)
    }

    pub fn potential(&self) -> Vec<PeerRecord> {
        self.records_in(PeerState::Potential)
    }

    /// (connected, disconnected, potential)
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for e in self.peers.iter() {
            match e.state {
                PeerState::Connected => counts.0 += 1,
                PeerState::Disconnected => counts.1 += 1,
                PeerState::Potential => counts.2 += 1,
            }
        }
        counts
    }

    pub fn stats(&self) -> ConnectStats {
        ConnectStats {
            senior_connects: self.stats.senior_connects.load(Ordering::Relaxed),
            principal_connects: self.stats.principal_connects.load(Ordering::Relaxed),
            disconnects: self.stats.disconnects.load(Ordering::Relaxed),
        }
    }

    /// Connected peers in ring order.
    pub fn connected_by_position(&self) -> Vec<(u64, PeerRecord)> {
        let mut ring: Vec<(u64, PeerRecord)> = self
            .connected()
            .into_iter()
            .map(|r| (ring::position(&r.id), r))
            .collect();
        ring.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.id.cmp(&b.1.id)));
        ring
    }

    pub fn lookup_by_address(&self, ip: &IpAddr) -> Option<PeerRecord> {
        self.peers
            .iter()
            .find(|e| e.record.has_address(ip))
            .map(|e| e.record.clone())
    }

    /// Up to `n` random peers from a partition.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        state: PeerState,
        n: usize,
        exclude: &HashSet<PeerId>,
        rng: &mut R,
    ) -> Vec<PeerRecord> {
        let pool: Vec<PeerRecord> = self
            .records_in(state)
            .into_iter()
            .filter(|r| !exclude.contains(&r.id))
            .collect();
        pool.choose_multiple(rng, n).cloned().collect()
    }

    // ── Listeners ──

    fn listeners(&self) -> Vec<Arc<dyn PeerActionListener>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notify_arrival(&self, record: &PeerRecord, contact: Contact) {
        for l in self.listeners() {
            l.peer_arrival(record, contact);
        }
    }

    fn notify_departure(&self, record: &PeerRecord, reason: &str) {
        for l in self.listeners() {
            l.peer_departure(record, reason);
        }
    }
}

impl PeerRegistry {
    /// Write all entries to the snapshot file. Best-effort; logs on failure.
    /// Returns the number of entries written.
    pub fn flush(&self) -> usize {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return 0,
        };
        let snapshot: Vec<SnapshotEntry> = self
            .peers
            .iter()
            .map(|e| SnapshotEntry {
                state: e.state,
                seed: seed::encode_plain(&e.record),
            })
            .collect();
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize peer registry");
                return 0;
            }
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %e, path = %parent.display(), "failed to create registry directory");
                return 0;
            }
        }
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, path)) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist peer registry");
            return 0;
        }
        snapshot.len()
    }

    /// Load entries from disk. Called once during construction.
    fn load_from_disk(&self) {
        let path = match self.persist_path.as_ref() {
            Some(p) => p,
            None => return,
        };
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read peer registry");
                return;
            }
        };
        let entries: Vec<SnapshotEntry> = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to parse peer registry");
                return;
            }
        };
        let mut loaded = 0usize;
        for entry in entries {
            match seed::decode(&entry.seed) {
                Ok(record) => {
                    self.place(record, entry.state);
                    loaded += 1;
                }
                Err(e) => tracing::debug!(error = %e, "skipping unreadable persisted seed"),
            }
        }
        if loaded > 0 {
            tracing::info!(count = loaded, path = %path.display(), "loaded persisted peers");
        }
    }
}

impl Clone for PeerRegistry {
    fn clone(&self) -> Self {
        Self {
            peers: self.peers.clone(),
            writer: self.writer.clone(),
            me: self.me.clone(),
            stats: self.stats.clone(),
            listeners: self.listeners.clone(),
            policy: self.policy.clone(),
            mode: self.mode,
            persist_path: self.persist_path.clone(),
        }
    }
}
