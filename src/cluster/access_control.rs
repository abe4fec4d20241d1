//! Which callers may use the peer datastore endpoints
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config_error;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessControl {
    AllowAll,
    AllowList(HashSet<IpAddr>),
}

impl Default for AccessControl {
    fn default() -> Self {
        AccessControl::AllowList(HashSet::new())
    }
}

impl AccessControl {
    pub fn allow_list(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        AccessControl::AllowList(addrs.into_iter().map(|ip| ip.to_canonical()).collect())
    }

    /// Build an allow-list from host names or literal addresses. A name that
    /// does not resolve is a configuration error.
    pub async fn resolve(hosts: &[String]) -> Result<Self> {
        let mut allowed = HashSet::new();
        for host in hosts {
            if let Ok(ip) = host.parse::<IpAddr>() {
                allowed.insert(ip.to_canonical());
                continue;
            }
            let resolved = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|err| config_error!("Unable to resolve allowed host {}: {}", host, err))?;
            let before = allowed.len();
            allowed.extend(resolved.map(|addr| addr.ip().to_canonical()));
            if allowed.len() == before {
                tracing::warn!("Allowed host {} resolved to no new addresses", host);
            }
        }
        Ok(AccessControl::AllowList(allowed))
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        match self {
            AccessControl::AllowAll => true,
            AccessControl::AllowList(allowed) => allowed.contains(&peer.to_canonical()),
        }
    }
}

/// Shared, swappable reference to the active [`AccessControl`]
#[derive(Clone, Debug, Default)]
pub struct AccessControlHandle {
    current: Arc<RwLock<Arc<AccessControl>>>,
}

impl AccessControlHandle {
    pub fn new(acl: AccessControl) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(acl))),
        }
    }

    pub fn current(&self) -> Arc<AccessControl> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, acl: AccessControl) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(acl);
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        self.current().is_allowed(peer)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn allow_all_admits_anyone() {
        assert!(AccessControl::AllowAll.is_allowed(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    }

    #[test]
    fn allow_list_matches_mapped_addresses() {
        let acl = AccessControl::allow_list([IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))]);
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));
        let mapped = IpAddr::V6(Ipv4Addr::new(10, 0, 0, 2).to_ipv6_mapped());
        assert!(acl.is_allowed(mapped));
        assert!(!acl.is_allowed(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3))));
        assert!(!acl.is_allowed(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn empty_allow_list_rejects_everyone() {
        assert!(!AccessControl::default().is_allowed(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[tokio::test]
    async fn resolves_literals_and_names() {
        let acl = AccessControl::resolve(&["127.0.0.1".to_string(), "localhost".to_string()])
            .await
            .unwrap();
        assert!(acl.is_allowed(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn handle_swaps_policy() {
        let handle = AccessControlHandle::default();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(!handle.is_allowed(ip));
        handle.replace(AccessControl::AllowAll);
        assert!(handle.is_allowed(ip));
    }
}
