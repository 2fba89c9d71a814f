//! Search target selection.
//!
//! DHT targets are the peers nearest to each query word on the ring, in
//! every vertical partition. Extra targets are peers the DHT walk would
//! miss: peers outside the DHT, root nodes, young peers and very large
//! peers, which are asked for full-text results instead.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rand::seq::index;
use rand::{Rng, RngCore};

use peerseek_core::{ring, PeerId, PeerRecord, WordHash};

use crate::registry::PeerRegistry;

/// Ring steps walked from a key's position before giving up.
pub const MAX_WALK_STEPS: usize = 20;

/// Extra targets must have been seen this recently.
const EXTRA_FRESHNESS_SECS: i64 = 60 * 60;

#[derive(Debug, Clone)]
pub struct SelectionParams {
    pub min_age_days: i64,
    /// Peers asked per key and partition.
    pub redundancy: usize,
    /// Peers collected per key and partition before the random pick.
    pub max_redundancy: usize,
    pub partition_exponent: u32,
    pub min_word_count: u64,
    pub exclude: HashSet<PeerId>,
    pub now: DateTime<Utc>,
}

impl SelectionParams {
    pub fn new(redundancy: usize, partition_exponent: u32, min_age_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            min_age_days,
            redundancy,
            max_redundancy: redundancy.saturating_mul(2).max(1),
            partition_exponent,
            min_word_count: 0,
            exclude: HashSet::new(),
            now,
        }
    }

    /// Upper bound on the number of targets returned.
    pub fn cap(&self) -> usize {
        self.redundancy
            .saturating_mul(ring::partitions(self.partition_exponent) as usize)
    }
}

/// Picks the peers a query is sent to. Given the same registry contents and
/// rng state, the choice is the same.
pub trait PeerSelector: Send + Sync {
    fn select_targets(&self, keys: &[WordHash], params: &SelectionParams, rng: &mut dyn RngCore) -> Vec<PeerId>;
}

#[derive(Clone)]
pub struct DhtSelector {
    registry: PeerRegistry,
}

impl DhtSelector {
    pub fn new(registry: PeerRegistry) -> Self {
        Self { registry }
    }
}

fn dht_candidate(peer: &PeerRecord, params: &SelectionParams) -> bool {
    peer.flags.accept_remote_index
        && peer.age_days(params.now) >= params.min_age_days
        && peer.word_count >= params.min_word_count
        && !params.exclude.contains(&peer.id)
}

impl PeerSelector for DhtSelector {
    fn select_targets(&self, keys: &[WordHash], params: &SelectionParams, rng: &mut dyn RngCore) -> Vec<PeerId> {
        let ring = self.registry.connected_by_position();
        if ring.is_empty() || params.redundancy == 0 {
            return Vec::new();
        }
        let steps = MAX_WALK_STEPS.min(ring.len());
        let partitions = ring::partitions(params.partition_exponent);

        // one nearest-first list per (key, partition)
        let mut lists: Vec<Vec<PeerId>> = Vec::new();
        for key in keys {
            for partition in 0..partitions {
                let pos = ring::vertical_position(key, partition, params.partition_exponent);
                let start = ring.partition_point(|(p, _)| *p < pos);
                let found: Vec<PeerId> = (0..steps)
                    .map(|i| &ring[(start + i) % ring.len()].1)
                    .filter(|peer| dht_candidate(peer, params))
                    .map(|peer| peer.id)
                    .take(params.max_redundancy.max(params.redundancy))
                    .collect();
                lists.push(pick_in_order(found, params.redundancy, rng));
            }
        }

        let cap = params.cap();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let longest = lists.iter().map(Vec::len).max().unwrap_or(0);
        'rank: for rank in 0..longest {
            for list in &lists {
                if let Some(id) = list.get(rank) {
                    if seen.insert(*id) {
                        out.push(*id);
                        if out.len() >= cap {
                            break 'rank;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Random subset of size `n`, kept in ring order.
fn pick_in_order(found: Vec<PeerId>, n: usize, rng: &mut dyn RngCore) -> Vec<PeerId> {
    if found.len() <= n {
        return found;
    }
    let mut picked = index::sample(rng, found.len(), n).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| found[i]).collect()
}

/// Choose up to `max_count` full-text targets among connected peers.
///
/// Every candidate starts at score zero and loses a random amount for each
/// trait that makes it likely to hold results the DHT does not reach.
/// Candidates without any such trait are skipped; the rest are taken
/// lowest score first.
pub fn select_extra_targets<R: Rng + ?Sized>(
    registry: &PeerRegistry,
    words: &[WordHash],
    max_count: usize,
    exclude: &HashSet<PeerId>,
    min_age_days: i64,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<PeerId> {
    if max_count == 0 {
        return Vec::new();
    }
    let fresh = Duration::seconds(EXTRA_FRESHNESS_SECS);
    let mut scored: Vec<(i64, PeerId)> = registry
        .connected()
        .into_iter()
        .filter(|p| !exclude.contains(&p.id) && p.flags.solr_available && p.seen_within(fresh, now))
        .filter_map(|p| {
            let score = extra_score(&p, words, min_age_days, now, rng);
            (score < 0).then_some((score, p.id))
        })
        .collect();
    scored.sort();
    scored.into_iter().take(max_count).map(|(_, id)| id).collect()
}

fn extra_score<R: Rng + ?Sized>(
    peer: &PeerRecord,
    words: &[WordHash],
    min_age_days: i64,
    now: DateTime<Utc>,
    rng: &mut R,
) -> i64 {
    let mut score = 0i64;
    if !peer.flags.accept_remote_index && peer.matches_tags(words) {
        score -= rng.gen_range(0..10) + 2;
    }
    if peer.flags.root_node {
        score -= rng.gen_range(0..30) + 6;
    }
    let age = peer.age_days(now);
    if age < min_age_days {
        score -= rng.gen_range(0..15) + 3;
    }
    if age < 1 {
        score -= rng.gen_range(0..40) + 8;
    }
    let links = peer.link_count;
    if (100_000..1_000_000).contains(&links) {
        score -= rng.gen_range(0..25) + 5;
    } else if links >= 1_000_000 {
        let pf = 1 + (20_000_000 / links) as i64;
        score -= rng.gen_range(0..pf) + pf / 5;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use peerseek_core::record::Contact;
    use peerseek_core::{Hash, NetworkMode, PeerType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn peer(id: Hash, n: u8, age_days: i64) -> PeerRecord {
        let mut r = PeerRecord::new(id, id.as_str(), PeerType::Senior, now() - Duration::days(age_days));
        r.add_address(format!("10.0.{}.{}", n / 200, n % 200 + 1).parse().unwrap());
        r.port = 8090;
        r.last_seen = now();
        r
    }

    fn populated(n: u8, age_days: i64) -> PeerRegistry {
        let reg = PeerRegistry::new(NetworkMode::All);
        let mut rng = StdRng::seed_from_u64(42);
        for i in 0..n {
            reg.add_connected(peer(Hash::random(&mut rng), i, age_days));
        }
        reg
    }

    #[test]
    fn selection_is_bounded_and_unique() {
        let reg = populated(100, 10);
        let sel = DhtSelector::new(reg);
        let params = SelectionParams::new(2, 2, 3, now());
        let keys = [Hash::of_word("rust"), Hash::of_word("ring")];

        let mut rng = StdRng::seed_from_u64(7);
        let targets = sel.select_targets(&keys, &params, &mut rng);
        assert!(!targets.is_empty());
        assert!(targets.len() <= params.cap());
        let unique: HashSet<_> = targets.iter().collect();
        assert_eq!(unique.len(), targets.len());
    }

    #[test]
    fn selection_is_deterministic_for_a_seed() {
        let reg = populated(50, 10);
        let sel = DhtSelector::new(reg);
        let params = SelectionParams::new(3, 3, 0, now());
        let keys = [Hash::of_word("deterministic")];

        let a = sel.select_targets(&keys, &params, &mut StdRng::seed_from_u64(9));
        let b = sel.select_targets(&keys, &params, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn young_excluded_and_non_dht_peers_skipped() {
        let reg = populated(20, 1);
        let sel = DhtSelector::new(reg.clone());
        let keys = [Hash::of_word("young")];
        let mut rng = StdRng::seed_from_u64(1);

        assert!(sel.select_targets(&keys, &SelectionParams::new(2, 0, 3, now()), &mut rng).is_empty());

        let mut params = SelectionParams::new(2, 0, 0, now());
        let all = sel.select_targets(&keys, &params, &mut rng);
        assert_eq!(all.len(), 2);

        params.exclude = all.iter().copied().collect();
        let rest = sel.select_targets(&keys, &params, &mut rng);
        assert!(rest.iter().all(|id| !params.exclude.contains(id)));

        for id in &rest {
            let mut r = reg.get(id).unwrap();
            r.flags.accept_remote_index = false;
            reg.add_connected(r);
        }
        let again = sel.select_targets(&keys, &params, &mut rng);
        assert!(again.iter().all(|id| !rest.contains(id)));
    }

    #[test]
    fn nearest_peer_comes_first() {
        let reg = PeerRegistry::new(NetworkMode::All);
        let key = Hash::parse("MMMMMMMMMMMM").unwrap();
        let near = Hash::parse("MMMMMMMMMMMN").unwrap();
        let far = Hash::parse("zzzzzzzzzzzz").unwrap();
        reg.add_connected(peer(far, 1, 10));
        reg.add_connected(peer(near, 2, 10));

        let sel = DhtSelector::new(reg);
        let mut params = SelectionParams::new(1, 0, 0, now());
        params.max_redundancy = 1;
        let targets = sel.select_targets(&[key], &params, &mut StdRng::seed_from_u64(0));
        assert_eq!(targets, vec![near]);
    }

    #[test]
    fn extra_targets_prefer_unusual_peers() {
        let reg = PeerRegistry::new(NetworkMode::All);
        let plain = peer(Hash::parse("plainAAAAAAA").unwrap(), 1, 30);
        let mut root = peer(Hash::parse("rootAAAAAAAA").unwrap(), 2, 30);
        root.flags.root_node = true;
        let fresh = peer(Hash::parse("freshAAAAAAA").unwrap(), 3, 0);
        let mut stale = peer(Hash::parse("staleAAAAAAA").unwrap(), 4, 0);
        stale.last_seen = now() - Duration::hours(2);
        let mut no_solr = peer(Hash::parse("nosolrAAAAAA").unwrap(), 5, 0);
        no_solr.flags.solr_available = false;
        for r in [plain.clone(), root.clone(), fresh.clone(), stale, no_solr] {
            reg.connect_peer(r, Contact::Gossip, now()).unwrap();
        }

        let mut rng = StdRng::seed_from_u64(3);
        let extra = select_extra_targets(&reg, &[], 10, &HashSet::new(), 3, now(), &mut rng);
        let set: HashSet<_> = extra.iter().collect();
        assert_eq!(set, [root.id, fresh.id].iter().collect());

        let excluded: HashSet<_> = [root.id].into_iter().collect();
        let extra = select_extra_targets(&reg, &[], 1, &excluded, 3, now(), &mut rng);
        assert_eq!(extra, vec![fresh.id]);
    }

    #[test]
    fn robinson_peer_selected_only_for_its_tags() {
        let reg = PeerRegistry::new(NetworkMode::All);
        let mut robinson = peer(Hash::parse("robinsonAAAA").unwrap(), 1, 30);
        robinson.flags.accept_remote_index = false;
        robinson.tags.insert("sailing".into());
        reg.add_connected(robinson.clone());

        let mut rng = StdRng::seed_from_u64(5);
        let none = HashSet::new();
        assert!(select_extra_targets(&reg, &[Hash::of_word("cooking")], 5, &none, 3, now(), &mut rng).is_empty());
        assert_eq!(
            select_extra_targets(&reg, &[Hash::of_word("Sailing")], 5, &none, 3, now(), &mut rng),
            vec![robinson.id]
        );
    }
}
