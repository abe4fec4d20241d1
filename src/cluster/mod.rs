//! Cluster membership, key ownership and peer access control
pub mod access_control;
pub mod hash_ring;
pub mod view;

pub use access_control::{AccessControl, AccessControlHandle};
pub use hash_ring::{HashRing, DEFAULT_VNODES_PER_MEMBER};
pub use view::{ClusterView, ClusterViewHandle};
