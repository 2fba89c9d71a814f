//! Peer arrival/departure notifications.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde::Serialize;

use peerseek_core::record::Contact;
use peerseek_core::PeerRecord;

/// Observer of registry transitions. Called after the registry has released
/// its writer lock, so implementations may query the registry.
pub trait PeerActionListener: Send + Sync {
    fn peer_arrival(&self, record: &PeerRecord, contact: Contact);
    fn peer_departure(&self, record: &PeerRecord, reason: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerEventKind {
    Arrival,
    Departure,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerEvent {
    pub kind: PeerEventKind,
    pub peer: String,
    pub name: String,
    pub detail: String,
    /// Unix seconds.
    pub at: i64,
}

/// Bounded in-memory log of recent peer events, served by the control API.
#[derive(Clone)]
pub struct PeerEventLog {
    events: Arc<Mutex<VecDeque<PeerEvent>>>,
    capacity: usize,
}

impl PeerEventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, event: PeerEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.capacity {
            events.pop_front();
        }
        if self.capacity > 0 {
            events.push_back(event);
        }
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<PeerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl PeerActionListener for PeerEventLog {
    fn peer_arrival(&self, record: &PeerRecord, contact: Contact) {
        let detail = match contact {
            Contact::Direct => "direct",
            Contact::Gossip => "gossip",
        };
        self.push(PeerEvent {
            kind: PeerEventKind::Arrival,
            peer: record.id.to_string(),
            name: record.name().to_string(),
            detail: detail.to_string(),
            at: Utc::now().timestamp(),
        });
    }

    fn peer_departure(&self, record: &PeerRecord, reason: &str) {
        self.push(PeerEvent {
            kind: PeerEventKind::Departure,
            peer: record.id.to_string(),
            name: record.name().to_string(),
            detail: reason.to_string(),
            at: Utc::now().timestamp(),
        });
    }
}
