//! Cluster-wide datastore: every key is served by its owner on the hash ring.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{CacheKey, Datastore, LocalStore, PatchOperation};
use crate::cluster::ClusterViewHandle;
use crate::error::{DipperError, MalformedRequest, Result};
use crate::protocol::{new_trace_id, RemoteCommand, RemoteExecutor, RemoteOutcome};

enum Route {
    Local,
    /// Owners ahead of this node in failover order. With `local_fallback`
    /// this node is the next candidate within the attempt budget.
    Remote {
        peers: Vec<SocketAddr>,
        local_fallback: bool,
    },
}

#[derive(Clone, Debug)]
pub struct DistributedDatastore {
    local: Arc<LocalStore>,
    cluster: ClusterViewHandle,
    executor: RemoteExecutor,
}

impl DistributedDatastore {
    pub fn new(local: Arc<LocalStore>, cluster: ClusterViewHandle, executor: RemoteExecutor) -> Self {
        Self {
            local,
            cluster,
            executor,
        }
    }

    pub fn local_store(&self) -> &Arc<LocalStore> {
        &self.local
    }

    fn route(&self, key: &CacheKey) -> Route {
        let view = self.cluster.current();
        let owners = view.owner_of(key);
        let local_at = owners.iter().position(|owner| view.is_local(owner));
        if owners.is_empty() || local_at == Some(0) {
            return Route::Local;
        }
        let budget = self.executor.settings().max_attempts.max(1);
        let ahead = local_at.unwrap_or(owners.len());
        Route::Remote {
            peers: owners.into_iter().take(ahead).collect(),
            local_fallback: local_at.is_some_and(|at| at < budget),
        }
    }

    /// Run `command` on the first reachable owner in ring order, this node
    /// included.
    async fn execute(&self, command: RemoteCommand) -> Result<RemoteOutcome> {
        let (peers, local_fallback) = match self.route(command.key()) {
            Route::Local => return command.execute_local(&self.local),
            Route::Remote {
                peers,
                local_fallback,
            } => (peers, local_fallback),
        };
        let trace_id = new_trace_id();
        match self.executor.execute(&command, &peers, &trace_id).await {
            Err(err) if err.is_transport() && local_fallback => {
                tracing::warn!(
                    trace_id = %trace_id,
                    "Serving {} on this node, owners ahead of it are down: {}",
                    command.key(),
                    err
                );
                command.execute_local(&self.local)
            }
            result => result,
        }
    }
}

fn unexpected(outcome: RemoteOutcome) -> DipperError {
    tracing::error!("Datastore peer answered with {:?}", outcome);
    MalformedRequest::UnexpectedRemoteBehavior.into()
}

#[async_trait]
impl Datastore for DistributedDatastore {
    /// Reads miss when no owner within the attempt budget is reachable
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        match self.execute(RemoteCommand::Get { key: key.clone() }).await {
            Ok(RemoteOutcome::Value(value)) => Ok(value),
            Ok(other) => Err(unexpected(other)),
            Err(err) if err.is_transport() => {
                tracing::warn!("Treating {} as absent: {}", key, err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<()> {
        let command = RemoteCommand::Put {
            key: key.clone(),
            value,
            ttl,
        };
        match self.execute(command).await? {
            RemoteOutcome::Stored => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        match self.execute(RemoteCommand::Delete { key: key.clone() }).await? {
            RemoteOutcome::Removed => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn patch(&self, key: &CacheKey, patch: &PatchOperation, ttl: Duration) -> Result<Bytes> {
        let command = RemoteCommand::Patch {
            key: key.clone(),
            patch: patch.clone(),
            ttl,
        };
        match self.execute(command).await? {
            RemoteOutcome::Patched(result) => Ok(result),
            other => Err(unexpected(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cluster::ClusterView;
    use crate::datastore::codec;
    use crate::protocol::RemoteSettings;

    fn datastore(local: SocketAddr, members: &[SocketAddr]) -> DistributedDatastore {
        datastore_with_attempts(local, members, 3)
    }

    fn datastore_with_attempts(
        local: SocketAddr,
        members: &[SocketAddr],
        max_attempts: usize,
    ) -> DistributedDatastore {
        let clock = Arc::new(ManualClock::new(0));
        let executor = RemoteExecutor::new(
            RemoteSettings {
                attempt_timeout: Duration::from_millis(200),
                max_attempts,
                ..RemoteSettings::default()
            },
            clock.clone(),
        )
        .unwrap();
        DistributedDatastore::new(
            Arc::new(LocalStore::new(clock)),
            ClusterViewHandle::new(ClusterView::new(local, members, 0)),
            executor,
        )
    }

    #[tokio::test]
    async fn single_node_serves_locally() {
        let local: SocketAddr = "127.0.0.1:8410".parse().unwrap();
        let store = datastore(local, &[]);
        let key = CacheKey::new("k").unwrap();
        store
            .put(&key, Bytes::from_static(b"v"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(Bytes::from_static(b"v")));
        let result = store
            .patch(&CacheKey::new("n").unwrap(), &PatchOperation::Increment { delta: 3 }, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(codec::decode::<i64>(&result).unwrap(), 3);
        store.remove(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    fn dead_address() -> SocketAddr {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
    }

    fn key_owned_by(store: &DistributedDatastore, owner: SocketAddr) -> CacheKey {
        let view = store.cluster.current();
        (0..1_000)
            .map(|i| CacheKey::new(format!("key-{}", i)).unwrap())
            .find(|key| view.primary_owner(key) == owner)
            .unwrap()
    }

    #[tokio::test]
    async fn dead_owner_fails_over_to_this_node() {
        let local: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let dead = dead_address();
        let store = datastore(local, &[local, dead]);
        let key = key_owned_by(&store, dead);

        let result = store
            .patch(&key, &PatchOperation::Increment { delta: 2 }, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(codec::decode::<i64>(&result).unwrap(), 2);
        store
            .put(&key, Bytes::from_static(b"v"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.local_store().get(&key), Some(Bytes::from_static(b"v")));
        assert_eq!(store.get(&key).await.unwrap(), Some(Bytes::from_static(b"v")));
        store.remove(&key).await.unwrap();
        assert!(store.local_store().get(&key).is_none());
    }

    #[tokio::test]
    async fn owners_beyond_the_attempt_budget_are_not_tried() {
        let local: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let dead = dead_address();
        let store = datastore_with_attempts(local, &[local, dead], 1);
        let key = key_owned_by(&store, dead);

        assert_eq!(store.get(&key).await.unwrap(), None);
        let err = store
            .put(&key, Bytes::from_static(b"v"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(store.local_store().is_empty());
    }
}
