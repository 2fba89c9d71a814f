//! In-memory document index.
//!
//! Serves `/peer/search` for this node and can take in results gathered
//! from remote peers. Postings are keyed by word hash, the same key the
//! DHT uses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;

use peerseek_core::{Hash, PeerId, UrlHash, WordHash};

use crate::protocol::{url_hash, ResultItem, SearchForm, SearchKind, SearchReply, PROTOCOL_VERSION};

const SNIPPET_CHARS: usize = 160;
const MAX_TOPICS: usize = 20;

/// Where accepted remote results may be copied.
pub trait LocalIndexSink: Send + Sync {
    fn store(&self, origin: &PeerId, items: &[ResultItem]);

    /// Items waiting to be indexed. Feeds the search health signals.
    fn backlog(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
struct Document {
    url: String,
    title: String,
    text: String,
    words: BTreeSet<String>,
}

/// Lowercased alphanumeric terms of a text.
pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

#[derive(Clone, Default)]
pub struct MemoryIndex {
    docs: Arc<DashMap<UrlHash, Document>>,
    postings: Arc<DashMap<WordHash, BTreeSet<UrlHash>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document. Re-adding a URL replaces it.
    pub fn add_document(&self, url: &str, title: &str, text: &str) -> UrlHash {
        let id = url_hash(url);
        let terms: BTreeSet<String> = words(title).chain(words(text)).collect();
        if let Some((_, old)) = self.docs.remove(&id) {
            for w in &old.words {
                if let Some(mut set) = self.postings.get_mut(&Hash::of_word(w)) {
                    set.remove(&id);
                }
            }
        }
        for w in &terms {
            self.postings.entry(Hash::of_word(w)).or_default().insert(id);
        }
        self.docs.insert(
            id,
            Document {
                url: url.to_string(),
                title: title.to_string(),
                text: text.to_string(),
                words: terms,
            },
        );
        id
    }

    /// Documents containing every word.
    pub fn search_hashes(&self, hashes: &[WordHash]) -> Vec<UrlHash> {
        let Some((first, rest)) = hashes.split_first() else {
            return Vec::new();
        };
        let mut hits = match self.postings.get(first) {
            Some(set) => set.clone(),
            None => return Vec::new(),
        };
        for h in rest {
            match self.postings.get(h) {
                Some(set) => hits.retain(|u| set.contains(u)),
                None => return Vec::new(),
            }
        }
        hits.into_iter().collect()
    }

    pub fn search_words(&self, query: &str) -> Vec<UrlHash> {
        let hashes: Vec<WordHash> = words(query).map(|w| Hash::of_word(&w)).collect();
        self.search_hashes(&hashes)
    }

    /// Distinct words indexed.
    pub fn word_count(&self) -> u64 {
        self.postings.iter().filter(|e| !e.is_empty()).count() as u64
    }

    /// Documents indexed.
    pub fn link_count(&self) -> u64 {
        self.docs.len() as u64
    }

    fn item(&self, id: &UrlHash) -> Option<ResultItem> {
        self.docs.get(id).map(|d| ResultItem {
            url_hash: id.to_string(),
            url: d.url.clone(),
            title: d.title.clone(),
            snippet: d.text.chars().take(SNIPPET_CHARS).collect(),
        })
    }

    /// Most frequent words across `hits`, query words excluded.
    fn topics(&self, hits: &[UrlHash], query: &[WordHash]) -> BTreeMap<String, u64> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for id in hits {
            if let Some(doc) = self.docs.get(id) {
                for w in doc.words.iter().filter(|w| !query.contains(&Hash::of_word(w))) {
                    *counts.entry(w.clone()).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(MAX_TOPICS).collect()
    }

    fn reply(&self, responder: &PeerId, hits: Vec<UrlHash>, query: &[WordHash], count: usize) -> SearchReply {
        let hits: Vec<UrlHash> = hits.into_iter().take(count).collect();
        SearchReply {
            version: PROTOCOL_VERSION,
            responder: responder.to_string(),
            items: hits.iter().filter_map(|id| self.item(id)).collect(),
            topics: self.topics(&hits, query),
            seeds: Vec::new(),
        }
    }

    pub fn answer_index(&self, responder: &PeerId, hashes: &[WordHash], count: usize) -> SearchReply {
        self.reply(responder, self.search_hashes(hashes), hashes, count)
    }

    pub fn answer_fulltext(&self, responder: &PeerId, query: &str, count: usize) -> SearchReply {
        let hashes: Vec<WordHash> = words(query).map(|w| Hash::of_word(&w)).collect();
        self.reply(responder, self.search_hashes(&hashes), &hashes, count)
    }

    /// Answer a decoded `/peer/search` request.
    pub fn answer(&self, responder: &PeerId, form: &SearchForm) -> SearchReply {
        match form.kind {
            SearchKind::Index => self.answer_index(responder, &form.word_hashes(), form.count),
            SearchKind::FullText => self.answer_fulltext(responder, &form.query, form.count),
        }
    }
}

impl LocalIndexSink for MemoryIndex {
    fn store(&self, origin: &PeerId, items: &[ResultItem]) {
        for item in items {
            self.add_document(&item.url, &item.title, &item.snippet);
        }
        tracing::debug!(peer = %origin, count = items.len(), "stored remote results");
    }
}
