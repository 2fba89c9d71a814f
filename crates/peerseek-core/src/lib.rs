//! peerseek-core — peer identities, ring arithmetic, peer records and the
//! seed codec. All other peerseek crates depend on this one.

pub mod config;
pub mod flags;
pub mod hash;
pub mod record;
pub mod ring;
pub mod seed;

pub use flags::Flags;
pub use hash::{Hash, HashError, PeerId, UrlHash, WordHash, HASH_LEN};
pub use record::{
    Contact, Counters, MergeOutcome, MergePolicy, MergeRejection, NetworkMode, NewestWinsPolicy,
    PeerRecord, PeerType, ValidationError,
};
pub use seed::SeedCodecError;
