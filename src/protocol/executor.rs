//! Sends datastore commands to peers, failing over along the ring.
//!
//! Each command is tried against the candidate owners in order, one attempt
//! per candidate. Peers that could not be reached are marked damaged for a
//! cooldown period and only tried after healthy peers. A peer that answers
//! with an error status is not failed over: its answer is final.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use papaya::HashMap;

use super::{RemoteCommand, RemoteOutcome};
use crate::clock::{duration_millis, SharedClock};
use crate::error::Result;
use crate::{config_error, transport_error};

#[derive(Clone, Debug)]
pub struct RemoteSettings {
    /// Deadline for a single attempt against a single peer
    pub attempt_timeout: Duration,
    /// Upper bound on peers tried for one command
    pub max_attempts: usize,
    /// How long an unreachable peer stays deprioritized
    pub damaged_cooldown: Duration,
    /// Identifies this node to its peers
    pub host_key: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(1),
            max_attempts: 3,
            damaged_cooldown: Duration::from_secs(30),
            host_key: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RemoteExecutor {
    client: reqwest::Client,
    settings: RemoteSettings,
    /// Peer -> unix millis until which it counts as damaged
    damaged: Arc<HashMap<SocketAddr, i64>>,
    clock: SharedClock,
}

impl RemoteExecutor {
    pub fn new(settings: RemoteSettings, clock: SharedClock) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.attempt_timeout)
            .build()
            .map_err(|err| config_error!("Unable to build datastore client: {}", err))?;
        Ok(Self {
            client,
            settings,
            damaged: Arc::new(HashMap::new()),
            clock,
        })
    }

    pub fn settings(&self) -> &RemoteSettings {
        &self.settings
    }

    pub fn is_damaged(&self, peer: &SocketAddr) -> bool {
        let now = self.clock.now_millis();
        self.damaged
            .pin()
            .get(peer)
            .map(|until| *until > now)
            .unwrap_or(false)
    }

    pub fn mark_damaged(&self, peer: SocketAddr) {
        let until = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(self.settings.damaged_cooldown));
        self.damaged.pin().insert(peer, until);
    }

    fn mark_healthy(&self, peer: &SocketAddr) {
        self.damaged.pin().remove(peer);
    }

    /// Healthy candidates first, then damaged ones, each group keeping ring
    /// order, truncated to the attempt budget.
    pub fn order_candidates(&self, candidates: &[SocketAddr]) -> Vec<SocketAddr> {
        let (healthy, damaged): (Vec<SocketAddr>, Vec<SocketAddr>) = candidates
            .iter()
            .partition(|peer| !self.is_damaged(peer));
        healthy
            .into_iter()
            .chain(damaged)
            .take(self.settings.max_attempts.max(1))
            .collect()
    }

    /// Run `command` against the first candidate that answers. Returns a
    /// transport error only once every candidate has been tried.
    pub async fn execute(
        &self,
        command: &RemoteCommand,
        candidates: &[SocketAddr],
        trace_id: &str,
    ) -> Result<RemoteOutcome> {
        let ordered = self.order_candidates(candidates);
        for peer in &ordered {
            match self.attempt(command, *peer, trace_id).await {
                Ok(outcome) => {
                    self.mark_healthy(peer);
                    return Ok(outcome);
                }
                Err(err) if err.is_transport() => {
                    tracing::warn!(
                        trace_id,
                        "Marking datastore peer {} damaged: {}",
                        peer,
                        err
                    );
                    self.mark_damaged(*peer);
                }
                Err(err) => return Err(err),
            }
        }
        Err(transport_error!(
            "No datastore owner reachable for {} after trying {:?}",
            command.key(),
            ordered
        ))
    }

    async fn attempt(
        &self,
        command: &RemoteCommand,
        peer: SocketAddr,
        trace_id: &str,
    ) -> Result<RemoteOutcome> {
        tracing::debug!(trace_id, "{} {} on {}", command.method(), command.key(), peer);
        let request = command.build_request(&self.client, peer, &self.settings.host_key, trace_id)?;
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|err| transport_error!("{} unreachable: {}", peer, err))?;
            let status = response.status();
            let body: Bytes = response
                .bytes()
                .await
                .map_err(|err| transport_error!("{} dropped the response: {}", peer, err))?;
            command.decode_response(peer, status, body)
        };
        tokio::time::timeout(self.settings.attempt_timeout, exchange)
            .await
            .map_err(|_| {
                transport_error!(
                    "{} did not answer within {:?}",
                    peer,
                    self.settings.attempt_timeout
                )
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::datastore::CacheKey;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn executor(clock: Arc<ManualClock>) -> RemoteExecutor {
        let settings = RemoteSettings {
            attempt_timeout: Duration::from_millis(200),
            ..RemoteSettings::default()
        };
        RemoteExecutor::new(settings, clock).unwrap()
    }

    #[test]
    fn damaged_peers_go_last_until_cooldown_ends() {
        let clock = Arc::new(ManualClock::new(0));
        let executor = executor(clock.clone());
        executor.mark_damaged(addr(1));
        assert_eq!(
            executor.order_candidates(&[addr(1), addr(2), addr(3)]),
            vec![addr(2), addr(3), addr(1)]
        );
        clock.advance(Duration::from_secs(30));
        assert!(!executor.is_damaged(&addr(1)));
        assert_eq!(
            executor.order_candidates(&[addr(1), addr(2), addr(3)]),
            vec![addr(1), addr(2), addr(3)]
        );
    }

    #[test]
    fn attempts_are_bounded() {
        let executor = executor(Arc::new(ManualClock::new(0)));
        let candidates: Vec<_> = (1..=5).map(addr).collect();
        assert_eq!(executor.order_candidates(&candidates).len(), 3);
    }

    #[tokio::test]
    async fn unreachable_peers_are_exhausted_and_marked() {
        // bind then drop to get ports nothing is listening on
        let dead: Vec<SocketAddr> = (0..2)
            .map(|_| {
                let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
                listener.local_addr().unwrap()
            })
            .collect();
        let executor = executor(Arc::new(ManualClock::new(0)));
        let command = RemoteCommand::Get {
            key: CacheKey::new("k").unwrap(),
        };
        let err = executor.execute(&command, &dead, "trace").await.unwrap_err();
        assert!(err.is_transport());
        assert!(dead.iter().all(|peer| executor.is_damaged(peer)));
    }
}
