//! A Dipper node: its local store, cluster view, peer access policy and the
//! rate limiting service built on top of the distributed datastore.
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::SharedClock;
use crate::cluster::{AccessControl, AccessControlHandle, ClusterView, ClusterViewHandle};
use crate::datastore::{DistributedDatastore, LocalStore};
use crate::error::Result;
use crate::limiters::{RateLimitCache, RateLimitingConfig, RateLimitingService};
use crate::protocol::RemoteExecutor;
use crate::settings::Settings;

#[derive(Clone, Debug)]
pub struct DipperNode {
    local: Arc<LocalStore>,
    cluster: ClusterViewHandle,
    access: AccessControlHandle,
    datastore: Arc<DistributedDatastore>,
    limits: RateLimitingService,
    max_object_size: usize,
}

impl DipperNode {
    /// Resolves allowed hosts and loads the rate limiting configuration
    pub async fn new(settings: &Settings, clock: SharedClock) -> Result<Self> {
        let access = if settings.allow_all_hosts {
            AccessControl::AllowAll
        } else {
            AccessControl::resolve(&settings.allowed_hosts).await?
        };
        let config = settings.rate_limiting_config()?;
        Self::build(settings, &config, access, clock)
    }

    pub fn build(
        settings: &Settings,
        config: &RateLimitingConfig,
        access: AccessControl,
        clock: SharedClock,
    ) -> Result<Self> {
        let node_address = settings.node_address()?;
        let view = ClusterView::new(node_address, &settings.cluster_members, 0);
        if view.members().len() > 1 {
            info!("Starting as {} in a cluster of {:?}", node_address, view.members());
        } else {
            info!("Starting as {} in single-node mode", node_address);
        }

        let local = Arc::new(LocalStore::new(clock.clone()));
        let cluster = ClusterViewHandle::new(view);
        let executor = RemoteExecutor::new(settings.remote_settings(), clock.clone())?;
        let datastore = Arc::new(DistributedDatastore::new(
            local.clone(),
            cluster.clone(),
            executor,
        ));
        let limits = RateLimitingService::new(RateLimitCache::new(datastore.clone(), clock), config)?;

        Ok(Self {
            local,
            cluster,
            access: AccessControlHandle::new(access),
            datastore,
            limits,
            max_object_size: settings.max_object_size,
        })
    }

    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn cluster(&self) -> &ClusterViewHandle {
        &self.cluster
    }

    pub fn access(&self) -> &AccessControlHandle {
        &self.access
    }

    pub fn datastore(&self) -> &Arc<DistributedDatastore> {
        &self.datastore
    }

    pub fn limits(&self) -> &RateLimitingService {
        &self.limits
    }

    pub fn max_object_size(&self) -> usize {
        self.max_object_size
    }

    /// Periodically reclaim expired entries from the local store
    pub fn spawn_expiry(&self, every: Duration) -> JoinHandle<()> {
        let local = self.local.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                local.expire_keys();
            }
        })
    }
}
