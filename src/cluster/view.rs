//! This node's view of the cluster: who the members are and who owns what.
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use super::hash_ring::HashRing;
use crate::datastore::CacheKey;

/// An immutable membership snapshot. A new view is built whenever membership
/// changes, so readers never observe a half-rebuilt ring.
#[derive(Clone, Debug)]
pub struct ClusterView {
    local: SocketAddr,
    ring: HashRing,
    version: u64,
}

impl ClusterView {
    /// The local node is always part of its own ring.
    pub fn new(local: SocketAddr, members: &[SocketAddr], version: u64) -> Self {
        let mut members = members.to_vec();
        if !members.contains(&local) {
            members.push(local);
        }
        Self {
            local,
            ring: HashRing::new(&members),
            version,
        }
    }

    pub fn single_node(local: SocketAddr) -> Self {
        Self::new(local, &[], 0)
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn members(&self) -> &[SocketAddr] {
        self.ring.members()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_local(&self, addr: &SocketAddr) -> bool {
        *addr == self.local
    }

    /// Members in preference order for `key`, primary owner first
    pub fn owner_of(&self, key: &CacheKey) -> Vec<SocketAddr> {
        self.ring.owners(key.as_bytes())
    }

    pub fn primary_owner(&self, key: &CacheKey) -> SocketAddr {
        self.ring.primary(key.as_bytes()).unwrap_or(self.local)
    }
}

/// Shared, swappable reference to the current [`ClusterView`]
#[derive(Clone, Debug)]
pub struct ClusterViewHandle {
    current: Arc<RwLock<Arc<ClusterView>>>,
}

impl ClusterViewHandle {
    pub fn new(view: ClusterView) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(view))),
        }
    }

    pub fn current(&self) -> Arc<ClusterView> {
        // a poisoned lock still holds a complete view
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the member list. The ring is rebuilt before the swap so that
    /// lookups keep running against the previous view in the meantime.
    pub fn update_members(&self, members: &[SocketAddr]) -> Arc<ClusterView> {
        let previous = self.current();
        let mut view = ClusterView::new(previous.local(), members, previous.version() + 1);

        let mut current = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if current.version() >= view.version {
            view.version = current.version() + 1;
        }
        let view = Arc::new(view);
        *current = view.clone();
        tracing::info!(
            "Cluster membership now {:?} (version {})",
            view.members(),
            view.version()
        );
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn single_node_owns_everything() {
        let view = ClusterView::single_node(addr(8410));
        let key = CacheKey::new("anything").unwrap();
        assert_eq!(view.owner_of(&key), vec![addr(8410)]);
        assert!(view.is_local(&view.primary_owner(&key)));
    }

    #[test]
    fn local_node_joins_its_own_ring() {
        let view = ClusterView::new(addr(1), &[addr(2), addr(3)], 0);
        assert_eq!(view.members().len(), 3);
    }

    #[test]
    fn update_bumps_version_and_keeps_old_snapshots() {
        let handle = ClusterViewHandle::new(ClusterView::single_node(addr(1)));
        let before = handle.current();
        let after = handle.update_members(&[addr(1), addr(2)]);
        assert_eq!(before.version(), 0);
        assert_eq!(after.version(), 1);
        assert_eq!(before.members().len(), 1);
        assert_eq!(handle.current().members().len(), 2);
        assert_eq!(handle.current().local(), addr(1));
    }
}
