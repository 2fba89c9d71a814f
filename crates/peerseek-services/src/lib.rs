//! peerseek-services — the peer registry, gossip, DHT target selection and
//! scatter-gather remote search. Shared by the daemon and the API.

pub mod contact;
pub mod events;
pub mod filter;
pub mod gossip;
pub mod health;
pub mod identity;
pub mod index;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod search;
pub mod selection;
pub mod transport;

pub use events::{PeerActionListener, PeerEvent, PeerEventLog};
pub use filter::{AllowAll, DomainFilter, ResultFilter};
pub use gossip::Gossip;
pub use health::{HealthBudget, HealthSignals};
pub use index::{LocalIndexSink, MemoryIndex};
pub use registry::{Arrival, ConnectRejection, InterfaceDeparture, PeerRegistry, PeerState, PingOutcome};
pub use search::{RemoteSearch, SearchOutcome, SearchQuery, SearchSettings};
pub use selection::{DhtSelector, PeerSelector, SelectionParams};
pub use transport::{Endpoint, Transport, TransportError};
