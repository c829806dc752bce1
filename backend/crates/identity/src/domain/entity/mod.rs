//! Domain Entities

pub mod activity;
pub mod candidate;
pub mod identity;
pub mod principal;

pub use activity::{ActivityEvent, ActivityKind};
pub use candidate::{AttributeType, CandidateQuery, LinkCandidate, MatchedAttribute};
pub use identity::{
    Destination, GroupMembership, IdentityRecord, LinkedIdentifiers, TwoFactor,
};
pub use principal::Principal;
