//! Scatter-gather remote search.
//!
//! A query is planned against the current health budget, fanned out to DHT
//! and full-text targets as one task each, and gathered until every task
//! finished or the deadline passed. Slow or broken peers cost at most one
//! request timeout; whatever arrived by then is the result.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use peerseek_core::config::SearchConfig;
use peerseek_core::{ring, Counters, Hash, PeerId, UrlHash, WordHash};

use crate::contact::{post_to_peer, ContactError};
use crate::filter::{AllowAll, ResultFilter};
use crate::gossip::ingest_gossip;
use crate::health::{Baseline, HealthBudget, HealthSignals};
use crate::index::{words, LocalIndexSink};
use crate::protocol::{self, url_hash, ResultItem, SearchKind, PATH_SEARCH};
use crate::registry::PeerRegistry;
use crate::selection::{select_extra_targets, DhtSelector, PeerSelector, SelectionParams};
use crate::transport::Transport;

// ── Query & settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub words: Vec<String>,
    /// Results wanted per peer.
    pub count: usize,
}

impl SearchQuery {
    pub fn new(text: &str, count: usize) -> Self {
        Self {
            words: words(text).collect(),
            count,
        }
    }

    pub fn word_hashes(&self) -> Vec<WordHash> {
        self.words.iter().map(|w| Hash::of_word(w)).collect()
    }

    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub redundancy: usize,
    pub partition_exponent: u32,
    pub min_age_days: i64,
    pub request_timeout: Duration,
    pub deadline: Duration,
    pub max_results_per_peer: usize,
    pub max_concurrency: usize,
    pub store_remote_results: bool,
}

impl From<&SearchConfig> for SearchSettings {
    fn from(cfg: &SearchConfig) -> Self {
        let max_concurrency = if cfg.max_concurrency == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() * 4)
                .unwrap_or(16)
        } else {
            cfg.max_concurrency
        };
        Self {
            redundancy: cfg.redundancy,
            partition_exponent: cfg.partition_exponent.min(ring::MAX_PARTITION_EXPONENT),
            min_age_days: cfg.min_age_days,
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
            deadline: Duration::from_millis(cfg.deadline_ms),
            max_results_per_peer: cfg.max_results_per_peer,
            max_concurrency,
            store_remote_results: cfg.store_remote_results,
        }
    }
}

// ── Plan & outcome ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SearchPlan {
    pub budget: HealthBudget,
    pub index_targets: Vec<PeerId>,
    pub fulltext_targets: Vec<PeerId>,
}

impl SearchPlan {
    fn targets(&self) -> impl Iterator<Item = (PeerId, SearchKind)> + '_ {
        self.index_targets
            .iter()
            .map(|id| (*id, SearchKind::Index))
            .chain(self.fulltext_targets.iter().map(|id| (*id, SearchKind::FullText)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { accepted: usize, rejected: usize },
    Timeout,
    TransportFailure { addr: Option<SocketAddr> },
    ProtocolMismatch { reason: String },
    /// Still running when the deadline passed.
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub peer: PeerId,
    pub kind: SearchKind,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedItem {
    pub origin: PeerId,
    pub kind: SearchKind,
    #[serde(flatten)]
    pub item: ResultItem,
}

/// Results gathered so far. Shared by all tasks of one search.
#[derive(Debug, Default)]
pub struct ResultAccumulator {
    items: Vec<AcceptedItem>,
    seen: HashSet<UrlHash>,
    per_peer: BTreeMap<PeerId, usize>,
    topics: BTreeMap<String, u64>,
}

impl ResultAccumulator {
    /// Append validated items. Items already gathered from another peer are
    /// skipped. Returns how many were new.
    pub fn add(
        &mut self,
        origin: PeerId,
        kind: SearchKind,
        items: Vec<(UrlHash, ResultItem)>,
        topics: BTreeMap<String, u64>,
    ) -> usize {
        let mut added = 0;
        for (hash, item) in items {
            if self.seen.insert(hash) {
                self.items.push(AcceptedItem { origin, kind, item });
                added += 1;
            }
        }
        *self.per_peer.entry(origin).or_default() += added;
        for (word, n) in topics {
            *self.topics.entry(word).or_default() += n;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub items: Vec<AcceptedItem>,
    /// New items contributed by each peer.
    pub per_peer: BTreeMap<PeerId, usize>,
    pub topics: BTreeMap<String, u64>,
    pub reports: Vec<PeerReport>,
    pub budget: HealthBudget,
    /// The deadline cut the search short.
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

// ── Search ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RemoteSearch {
    registry: PeerRegistry,
    transport: Arc<dyn Transport>,
    selector: Arc<dyn PeerSelector>,
    filter: Arc<dyn ResultFilter>,
    sink: Option<Arc<dyn LocalIndexSink>>,
    settings: SearchSettings,
}

impl RemoteSearch {
    pub fn new(registry: PeerRegistry, transport: Arc<dyn Transport>, settings: SearchSettings) -> Self {
        Self {
            selector: Arc::new(DhtSelector::new(registry.clone())),
            registry,
            transport,
            filter: Arc::new(AllowAll),
            sink: None,
            settings,
        }
    }

    pub fn with_selector(mut self, selector: Arc<dyn PeerSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResultFilter>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LocalIndexSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Choose targets for `query` under the budget `signals` allow.
    pub fn plan(&self, query: &SearchQuery, signals: &HealthSignals, rng: &mut dyn RngCore) -> SearchPlan {
        let now = Utc::now();
        let baseline = Baseline {
            redundancy: self.settings.redundancy,
            partitions: ring::partitions(self.settings.partition_exponent) as usize,
            max_concurrency: self.settings.max_concurrency,
        };
        let budget = HealthBudget::compute(&baseline, signals);
        let keys = query.word_hashes();
        let mut exclude: HashSet<PeerId> = self.registry.my_id().into_iter().collect();

        let mut index_targets = Vec::new();
        if budget.index_enabled && !keys.is_empty() {
            let mut params = SelectionParams::new(
                budget.redundancy,
                self.settings.partition_exponent,
                self.settings.min_age_days,
                now,
            );
            params.exclude = exclude.clone();
            index_targets = self.selector.select_targets(&keys, &params, rng);
            if index_targets.len() > budget.target_cap {
                index_targets = index_targets
                    .choose_multiple(rng, budget.target_cap)
                    .copied()
                    .collect();
            }
        }
        exclude.extend(index_targets.iter().copied());

        let fulltext_targets = if budget.fulltext_enabled {
            select_extra_targets(
                &self.registry,
                &keys,
                budget.extra_count,
                &exclude,
                self.settings.min_age_days,
                now,
                rng,
            )
        } else {
            Vec::new()
        };

        SearchPlan {
            budget,
            index_targets,
            fulltext_targets,
        }
    }

    /// Plan and run a search with freshly sampled health signals.
    pub async fn search(&self, query: SearchQuery) -> SearchOutcome {
        let backlog = self.sink.as_ref().map_or(0, |s| s.backlog());
        self.search_with(query, HealthSignals::sample(backlog)).await
    }

    pub async fn search_with(&self, query: SearchQuery, signals: HealthSignals) -> SearchOutcome {
        let plan = {
            let mut rng = rand::thread_rng();
            self.plan(&query, &signals, &mut rng)
        };
        self.execute(query, plan).await
    }

    /// Fan out to every planned target and gather until done or the
    /// deadline passes.
    pub async fn execute(&self, query: SearchQuery, plan: SearchPlan) -> SearchOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.settings.deadline;
        let query = Arc::new(query);
        let acc = Arc::new(Mutex::new(ResultAccumulator::default()));
        let semaphore = Arc::new(Semaphore::new(plan.budget.concurrency.max(1)));

        let mut pending: HashSet<(PeerId, SearchKind)> = HashSet::new();
        let mut tasks = JoinSet::new();
        for (peer, kind) in plan.targets() {
            pending.insert((peer, kind));
            let this = self.clone();
            let query = query.clone();
            let acc = acc.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.query_peer(peer, kind, &query, &acc).await,
                    Err(_) => TaskOutcome::Interrupted,
                };
                (peer, kind, outcome)
            });
        }

        let mut reports = Vec::with_capacity(pending.len());
        let mut timed_out = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((peer, kind, outcome)))) => {
                    pending.remove(&(peer, kind));
                    reports.push(PeerReport { peer, kind, outcome });
                }
                Ok(Some(Err(e))) => tracing::warn!(error = %e, "search task failed"),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    tasks.abort_all();
                    break;
                }
            }
        }
        for (peer, kind) in pending {
            reports.push(PeerReport {
                peer,
                kind,
                outcome: TaskOutcome::Interrupted,
            });
        }

        let acc = std::mem::take(&mut *acc.lock().unwrap_or_else(PoisonError::into_inner));
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            words = query.words.len(),
            targets = reports.len(),
            results = acc.len(),
            timed_out,
            elapsed_ms,
            "remote search finished"
        );
        SearchOutcome {
            items: acc.items,
            per_peer: acc.per_peer,
            topics: acc.topics,
            reports,
            budget: plan.budget,
            timed_out,
            elapsed_ms,
        }
    }

    async fn query_peer(
        &self,
        id: PeerId,
        kind: SearchKind,
        query: &SearchQuery,
        acc: &Mutex<ResultAccumulator>,
    ) -> TaskOutcome {
        let Some(peer) = self.registry.get(&id) else {
            return TaskOutcome::TransportFailure { addr: None };
        };
        let count = query.count.min(self.settings.max_results_per_peer);
        let me = self.registry.my_seed();
        let form = protocol::search_request(kind, &query.word_hashes(), &query.text(), count, me.as_ref());

        // one timeout for the whole task, however many addresses it tries
        let request = post_to_peer(
            self.transport.as_ref(),
            &self.registry,
            &peer,
            PATH_SEARCH,
            &form,
            self.settings.request_timeout,
        );
        let contacted = match tokio::time::timeout(self.settings.request_timeout, request).await {
            Ok(Ok(c)) => c,
            Ok(Err(e)) => {
                tracing::debug!(peer = %id, ?kind, error = %e, "remote search request failed");
                if kind == SearchKind::FullText {
                    self.registry.set_solr_available(&id, false);
                }
                return match e {
                    ContactError::Timeout { .. } => TaskOutcome::Timeout,
                    e => TaskOutcome::TransportFailure { addr: e.addr() },
                };
            }
            Err(_) => {
                tracing::debug!(peer = %id, ?kind, "remote search ran out of time");
                if kind == SearchKind::FullText {
                    self.registry.set_solr_available(&id, false);
                }
                return TaskOutcome::Timeout;
            }
        };

        let reply = match protocol::parse_search_reply(&contacted.body) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(peer = %id, error = %e, "unusable search reply");
                return TaskOutcome::ProtocolMismatch { reason: e.to_string() };
            }
        };
        if reply.responder != id.as_str() {
            return TaskOutcome::ProtocolMismatch {
                reason: format!("reply from {} instead of {id}", reply.responder),
            };
        }

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for item in reply.items.into_iter().take(count) {
            match self.check_item(&item) {
                Some(hash) => accepted.push((hash, item)),
                None => rejected += 1,
            }
        }
        if rejected > 0 {
            tracing::debug!(peer = %id, rejected, "dropped invalid search results");
        }

        let now = Utc::now();
        ingest_gossip(&self.registry, &reply.seeds, now);

        let n = accepted.len() as u64;
        let index_refs = if kind == SearchKind::Index { n } else { 0 };
        self.registry.record_traffic(
            &id,
            Counters {
                url_sent: n,
                index_sent: index_refs,
                ..Counters::default()
            },
        );
        self.registry.update_my_seed(|me| {
            me.add_traffic(Counters {
                url_received: n,
                index_received: index_refs,
                ..Counters::default()
            })
        });

        if self.settings.store_remote_results && !accepted.is_empty() {
            if let Some(sink) = &self.sink {
                let items: Vec<ResultItem> = accepted.iter().map(|(_, i)| i.clone()).collect();
                sink.store(&id, &items);
            }
        }

        let accepted_count = accepted.len();
        acc.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(id, kind, accepted, reply.topics);
        TaskOutcome::Success {
            accepted: accepted_count,
            rejected,
        }
    }

    /// The url hash must be well formed and actually belong to the url.
    fn check_item(&self, item: &ResultItem) -> Option<UrlHash> {
        let claimed = Hash::parse(&item.url_hash).ok()?;
        if claimed != url_hash(&item.url) {
            return None;
        }
        self.filter.is_accepted(&item.url).then_some(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::memory::{Behaviour, MemoryTransport};
    use crate::protocol::{SearchForm, SearchReply, PROTOCOL_VERSION};
    use crate::transport::Endpoint;
    use bytes::Bytes;
    use chrono::Duration as ChronoDuration;
    use peerseek_core::{NetworkMode, PeerRecord, PeerType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Net {
        registry: PeerRegistry,
        transport: MemoryTransport,
        peers: Vec<(PeerId, Endpoint, MemoryIndex)>,
    }

    fn settings() -> SearchSettings {
        SearchSettings {
            redundancy: 3,
            partition_exponent: 0,
            min_age_days: 0,
            request_timeout: Duration::from_millis(500),
            deadline: Duration::from_secs(2),
            max_results_per_peer: 10,
            max_concurrency: 8,
            store_remote_results: false,
        }
    }

    fn form_of(pairs: &[(&'static str, String)]) -> SearchForm {
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };
        SearchForm {
            version: get("version").parse().unwrap_or(0),
            kind: if get("kind") == "fulltext" {
                SearchKind::FullText
            } else {
                SearchKind::Index
            },
            words: get("words"),
            query: get("query"),
            count: get("count").parse().unwrap_or(0),
            seed: None,
        }
    }

    /// `n` old, healthy peers, each serving its own index.
    fn network(n: u8) -> Net {
        let registry = PeerRegistry::new(NetworkMode::All);
        let mut me = PeerRecord::new(Hash::parse("meAAAAAAAAAA").unwrap(), "me", PeerType::Senior, Utc::now());
        me.port = 8090;
        registry.set_my_seed(me);
        let transport = MemoryTransport::new();
        let mut rng = StdRng::seed_from_u64(11);
        let mut peers = Vec::new();
        for i in 0..n {
            let id = Hash::random(&mut rng);
            let mut r = PeerRecord::new(id, &format!("p{i}"), PeerType::Senior, Utc::now() - ChronoDuration::days(30));
            let addr: SocketAddr = format!("10.0.0.{}:8090", i + 1).parse().unwrap();
            r.add_address(addr.ip());
            r.port = 8090;
            r.last_seen = Utc::now();
            registry.add_connected(r);

            let endpoint = Endpoint::plain(addr);
            let index = MemoryIndex::new();
            let served = index.clone();
            transport.route(endpoint, move |_, form| {
                let reply = served.answer(&id, &form_of(form));
                Behaviour::Reply(Bytes::from(serde_json::to_vec(&reply).unwrap()))
            });
            peers.push((id, endpoint, index));
        }
        Net {
            registry,
            transport,
            peers,
        }
    }

    fn search(net: &Net, settings: SearchSettings) -> RemoteSearch {
        RemoteSearch::new(net.registry.clone(), Arc::new(net.transport.clone()), settings)
    }

    fn healthy() -> HealthSignals {
        HealthSignals {
            queue_len: 0,
            load: 0.0,
            cores: 8,
            short_memory: false,
        }
    }

    #[tokio::test]
    async fn gathers_and_deduplicates() {
        let net = network(3);
        net.peers[0].2.add_document("http://a.org/", "rust ring", "");
        net.peers[1].2.add_document("http://a.org/", "rust ring", "");
        net.peers[1].2.add_document("http://b.org/", "rust gossip", "");

        let outcome = search(&net, settings())
            .search_with(SearchQuery::new("rust", 10), healthy())
            .await;

        assert!(!outcome.timed_out);
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.per_peer.values().sum::<usize>(), 2);
        assert_eq!(outcome.reports.len(), 3);
        assert!(outcome
            .reports
            .iter()
            .all(|r| matches!(r.outcome, TaskOutcome::Success { .. })));
        assert_eq!(outcome.topics.get("ring"), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_peer_costs_one_timeout() {
        let net = network(3);
        for (_, _, index) in &net.peers {
            index.add_document("http://a.org/", "rust", "");
        }
        let (slow, slow_ep, _) = net.peers[2].clone();
        net.transport.route_fixed(slow_ep, Behaviour::Hang);

        let started = tokio::time::Instant::now();
        let outcome = search(&net, settings())
            .search_with(SearchQuery::new("rust", 10), healthy())
            .await;

        assert!(started.elapsed() <= settings().request_timeout + Duration::from_millis(50));
        assert!(!outcome.timed_out);
        assert_eq!(outcome.items.len(), 1);
        let slow_report = outcome.reports.iter().find(|r| r.peer == slow).unwrap();
        assert_eq!(slow_report.outcome, TaskOutcome::Timeout);
        assert_eq!(
            net.registry.state_of(&slow),
            Some(crate::registry::PeerState::Disconnected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn peer_with_many_silent_addresses_costs_one_timeout() {
        let net = network(1);
        let (id, ep, _) = net.peers[0].clone();
        let mut r = net.registry.get(&id).unwrap();
        r.add_address("2001:db8::1".parse().unwrap());
        r.flags.ssl_available = true;
        net.registry.add_connected(r);
        let v6: SocketAddr = "[2001:db8::1]:8090".parse().unwrap();
        for endpoint in [
            Endpoint::new(ep.addr, true),
            ep,
            Endpoint::new(v6, true),
            Endpoint::plain(v6),
        ] {
            net.transport.route_fixed(endpoint, Behaviour::Hang);
        }

        let started = tokio::time::Instant::now();
        let outcome = search(&net, settings())
            .search_with(SearchQuery::new("rust", 10), healthy())
            .await;

        assert!(started.elapsed() <= settings().request_timeout + Duration::from_millis(50));
        assert!(!outcome.timed_out);
        assert!(!outcome.reports.is_empty());
        assert!(outcome.reports.iter().all(|r| r.outcome == TaskOutcome::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_remaining_tasks() {
        let net = network(2);
        for (_, ep, _) in &net.peers {
            net.transport.route_fixed(*ep, Behaviour::Hang);
        }
        let mut s = settings();
        s.request_timeout = Duration::from_secs(10);
        s.deadline = Duration::from_secs(1);

        let outcome = search(&net, s).search_with(SearchQuery::new("rust", 10), healthy()).await;
        assert!(outcome.timed_out);
        assert!(outcome.items.is_empty());
        assert_eq!(outcome.reports.len(), 2);
        assert!(outcome.reports.iter().all(|r| r.outcome == TaskOutcome::Interrupted));
        // aborted tasks leave the registry alone
        assert_eq!(net.registry.counts().0, 2);
    }

    #[tokio::test]
    async fn spam_and_filtered_results_rejected() {
        let net = network(1);
        let (id, ep, _) = net.peers[0].clone();
        let reply = SearchReply {
            version: PROTOCOL_VERSION,
            responder: id.to_string(),
            items: vec![
                ResultItem {
                    url_hash: url_hash("http://good.org/").to_string(),
                    url: "http://good.org/".into(),
                    title: "rust".into(),
                    snippet: String::new(),
                },
                ResultItem {
                    url_hash: url_hash("http://good.org/").to_string(),
                    url: "http://spam.org/".into(),
                    title: "rust".into(),
                    snippet: String::new(),
                },
                ResultItem {
                    url_hash: "short".into(),
                    url: "http://x.org/".into(),
                    title: String::new(),
                    snippet: String::new(),
                },
                ResultItem {
                    url_hash: url_hash("http://blocked.org/").to_string(),
                    url: "http://blocked.org/".into(),
                    title: String::new(),
                    snippet: String::new(),
                },
            ],
            topics: BTreeMap::new(),
            seeds: Vec::new(),
        };
        net.transport
            .route_fixed(ep, Behaviour::Reply(Bytes::from(serde_json::to_vec(&reply).unwrap())));

        let filter = crate::filter::DomainFilter::new(["blocked.org"], Vec::<String>::new());
        let outcome = search(&net, settings())
            .with_filter(Arc::new(filter))
            .search_with(SearchQuery::new("rust", 10), healthy())
            .await;

        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.items[0].item.url, "http://good.org/");
        assert_eq!(
            outcome.reports[0].outcome,
            TaskOutcome::Success {
                accepted: 1,
                rejected: 3
            }
        );
        assert_eq!(net.registry.get(&id).unwrap().counters().url_sent, 1);
        assert_eq!(net.registry.my_seed().unwrap().counters().url_received, 1);
    }

    #[tokio::test]
    async fn foreign_responder_is_a_protocol_mismatch() {
        let net = network(2);
        let (_, ep, _) = net.peers[0].clone();
        let (other, _, index) = net.peers[1].clone();
        index.add_document("http://a.org/", "rust", "");
        net.transport.route(ep, move |_, form| {
            let reply = index.answer(&other, &form_of(form));
            Behaviour::Reply(Bytes::from(serde_json::to_vec(&reply).unwrap()))
        });

        let outcome = search(&net, settings())
            .search_with(SearchQuery::new("rust", 10), healthy())
            .await;
        assert_eq!(outcome.items.len(), 1);
        assert!(outcome
            .reports
            .iter()
            .any(|r| matches!(r.outcome, TaskOutcome::ProtocolMismatch { .. })));
    }

    #[tokio::test]
    async fn failed_fulltext_peer_loses_solr_flag() {
        let net = network(1);
        let (id, ep, _) = net.peers[0].clone();
        net.transport
            .route_fixed(ep, Behaviour::Fail(crate::transport::TransportError::Status(503)));

        let plan = SearchPlan {
            budget: HealthBudget::compute(
                &Baseline {
                    redundancy: 1,
                    partitions: 1,
                    max_concurrency: 4,
                },
                &healthy(),
            ),
            index_targets: Vec::new(),
            fulltext_targets: vec![id],
        };
        let outcome = search(&net, settings()).execute(SearchQuery::new("rust", 10), plan).await;
        assert!(matches!(outcome.reports[0].outcome, TaskOutcome::TransportFailure { .. }));
        assert!(!net.registry.get(&id).unwrap().flags.solr_available);
    }

    #[test]
    fn plan_sheds_under_load_and_caps_targets() {
        let net = network(10);
        let rs = search(&net, settings());
        let query = SearchQuery::new("rust", 10);
        let mut rng = StdRng::seed_from_u64(4);

        let plan = rs.plan(&query, &healthy(), &mut rng);
        assert!(!plan.index_targets.is_empty());
        assert!(plan.index_targets.len() <= plan.budget.target_cap);
        assert!(!plan.index_targets.contains(&Hash::parse("meAAAAAAAAAA").unwrap()));

        let overloaded = HealthSignals {
            load: 9.0,
            ..healthy()
        };
        let plan = rs.plan(&query, &overloaded, &mut rng);
        assert!(plan.index_targets.is_empty());
        assert!(plan.fulltext_targets.is_empty());
    }

    #[test]
    fn accumulator_merges_topics_additively() {
        let mut acc = ResultAccumulator::default();
        let a = Hash::parse("aaaaaaaaaaaa").unwrap();
        let item = ResultItem {
            url_hash: url_hash("http://a.org/").to_string(),
            url: "http://a.org/".into(),
            title: String::new(),
            snippet: String::new(),
        };
        let topics: BTreeMap<String, u64> = [("ring".to_string(), 2)].into_iter().collect();
        assert_eq!(acc.add(a, SearchKind::Index, vec![(url_hash("http://a.org/"), item.clone())], topics.clone()), 1);
        assert_eq!(acc.add(a, SearchKind::Index, vec![(url_hash("http://a.org/"), item)], topics), 0);
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.topics.get("ring"), Some(&4));
    }
}
