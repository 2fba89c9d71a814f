//! Our own peer identity.
//!
//! A new node places itself in a sparsely populated part of the ring so the
//! DHT load spreads evenly. The resulting seed is kept on disk and reused on
//! every start.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;

use peerseek_core::config::{IdentityConfig, NetworkConfig};
use peerseek_core::{ring, seed, Hash, PeerId, PeerRecord};

use crate::registry::PeerRegistry;

/// Characters of a new id taken from the chosen ring position.
const POSITION_PREFIX: usize = 2;
/// Below this many connected peers there is no structure worth aiming for.
const MIN_PEERS_FOR_GAP: usize = 3;

/// Make up an id for a new node, not yet known to `registry`.
pub fn generate_self_id(registry: &PeerRegistry, rng: &mut dyn RngCore) -> PeerId {
    let positions: Vec<u64> = registry
        .connected_by_position()
        .into_iter()
        .map(|(p, _)| p)
        .collect();
    loop {
        let random = Hash::random(rng);
        let id = if positions.len() < MIN_PEERS_FOR_GAP {
            random
        } else {
            match ring::pick_gap_position(&positions, rng) {
                Some(pos) => Hash::splice(&ring::hash_at(pos), &random, POSITION_PREFIX),
                None => random,
            }
        };
        if !registry.is_known(&id) {
            return id;
        }
    }
}

/// Load our seed from `identity.seed_path`, or create one. Configured name,
/// tier, tags and addresses always override what was stored.
pub fn load_or_create_my_seed(
    identity: &IdentityConfig,
    network: &NetworkConfig,
    registry: &PeerRegistry,
    now: DateTime<Utc>,
    rng: &mut dyn RngCore,
) -> Result<PeerRecord> {
    let mut me = match read_seed(&identity.seed_path)? {
        Some(stored) => {
            tracing::info!(peer = %stored.id, "loaded own seed");
            stored
        }
        None => {
            let id = generate_self_id(registry, rng);
            tracing::info!(peer = %id, "created new identity");
            PeerRecord::new(id, "", identity.peer_type, now)
        }
    };

    if !identity.name.is_empty() {
        me.set_name(&identity.name);
    } else if me.name().is_empty() {
        me.set_name(&format!("peer-{}", &me.id.as_str()[..6]));
    }
    me.peer_type = identity.peer_type;
    me.port = network.peer_port;
    me.last_seen = now;
    // the peer port is served in plain HTTP only
    me.flags.ssl_available = false;
    me.tags = identity.tags.iter().map(|t| t.trim().to_lowercase()).filter(|t| !t.is_empty()).collect();
    let addrs: Vec<IpAddr> = network
        .public_addresses
        .iter()
        .filter_map(|a| match a.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                tracing::warn!(addr = %a, "ignoring unparseable public address");
                None
            }
        })
        .collect();
    if !addrs.is_empty() {
        me.set_addresses(addrs);
    }
    me.validate(true, network.mode).context("own seed is invalid")?;

    write_seed(&identity.seed_path, &me)?;
    registry.set_my_seed(me.clone());
    Ok(me)
}

fn read_seed(path: &Path) -> Result<Option<PeerRecord>> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    match seed::decode(&text) {
        Ok(r) => Ok(Some(r)),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "own seed unreadable, creating a new one");
            Ok(None)
        }
    }
}

/// Persist our seed in storage form.
pub fn write_seed(path: &Path, me: &PeerRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, seed::encode_plain(me)).with_context(|| format!("failed to write {}", path.display()))
}
