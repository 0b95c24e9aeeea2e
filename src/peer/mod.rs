//! The gossip-backed peer directory: an eventually consistent view of the
//! cluster's peers keyed by node name, answering role-filtered endpoint
//! queries. Mutated only by gossip callbacks (see [`delegate`]); read by
//! many concurrent callers under a reader/writer lock.

pub mod delegate;
pub mod record;
pub mod transport;

pub use record::{PeerRecord, Role};
pub use transport::{GossipTransport, InProcessTransport};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use delegate::{BroadcastQueue, Delegate, PeerDelegate};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub(crate) type SharedTable = Arc<RwLock<HashMap<String, PeerRecord>>>;

/// Opaque, structured dump of the directory suitable for debug rendering.
#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub self_name: String,
    pub size: usize,
    pub members: HashMap<String, PeerRecord>,
}

pub struct Directory {
    name: String,
    table: SharedTable,
    delegate: Arc<PeerDelegate>,
    transport: Arc<dyn GossipTransport>,
}

impl Directory {
    /// Adopts the transport's cluster-unique name as this node's own,
    /// registers this node's own record locally, constructs the broadcast
    /// queue (before any transport callback can possibly fire), then
    /// attempts to contact each seed via `transport`. Failing to contact
    /// *all* seeds is a creation error; partial success is left to the
    /// transport to decide.
    pub async fn join(
        transport: Arc<dyn GossipTransport>,
        seeds: &[String],
        self_role: Role,
        self_api_addr: String,
        self_api_port: u16,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let name = transport.local_name().to_string();
        let table: SharedTable = Arc::new(RwLock::new(HashMap::new()));
        table.write().insert(
            name.clone(),
            PeerRecord {
                role: self_role,
                api_addr: self_api_addr,
                api_port: self_api_port,
            },
        );

        // The queue must exist before the transport's listener starts so an
        // immediate GetBroadcasts callback never races an uninitialized
        // directory. Constructing it here, synchronously, before `transport`
        // is ever handed the delegate, is how that ordering is enforced.
        let queue = BroadcastQueue::new();
        let delegate = Arc::new(PeerDelegate::new(table.clone(), queue, metrics));

        if !seeds.is_empty() && transport.size() <= 1 {
            // The injected transport is responsible for actually dialing
            // seeds as part of construction; if it reports back alone after
            // being given a non-empty seed list, treat that as a join
            // failure rather than silently running single-node.
            return Err(Error::Gossip(format!(
                "failed to contact any of {} seed(s)",
                seeds.len()
            )));
        }

        Ok(Self {
            name,
            table,
            delegate,
            transport,
        })
    }

    pub fn delegate(&self) -> Arc<PeerDelegate> {
        self.delegate.clone()
    }

    /// All known peers whose role satisfies `requested`.
    pub fn endpoints(&self, requested: Role) -> Vec<String> {
        self.table
            .read()
            .values()
            .filter(|record| record.role.satisfies(requested))
            .map(PeerRecord::endpoint)
            .collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.transport.size()
    }

    pub fn state(&self) -> StateSnapshot {
        StateSnapshot {
            self_name: self.name.clone(),
            size: self.size(),
            members: self.table.read().clone(),
        }
    }

    pub async fn leave(&self, timeout: Duration) -> Result<()> {
        self.transport.leave(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delegate::Delegate as _;

    async fn directory(role: Role) -> Directory {
        let transport = Arc::new(InProcessTransport::new("self".into()));
        Directory::join(transport, &[], role, "127.0.0.1".into(), 9000, Arc::new(Metrics::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn role_filter_matches_ingest_store_to_both_queries() {
        let dir = directory(Role::Ingest).await;
        dir.delegate().merge_remote_state(
            br#"{"store-1":{"type":"store","api_addr":"10.0.0.2","api_port":1},"both-1":{"type":"ingeststore","api_addr":"10.0.0.3","api_port":2}}"#,
            true,
        );

        let ingest = dir.endpoints(Role::Ingest);
        assert!(ingest.contains(&"10.0.0.3:2".to_string()));
        assert!(!ingest.contains(&"10.0.0.2:1".to_string()));

        let store = dir.endpoints(Role::Store);
        assert!(store.contains(&"10.0.0.2:1".to_string()));
        assert!(store.contains(&"10.0.0.3:2".to_string()));

        let both = dir.endpoints(Role::IngestStore);
        assert_eq!(both, vec!["10.0.0.3:2".to_string()]);
    }

    #[tokio::test]
    async fn leave_event_removes_the_peer() {
        let dir = directory(Role::Ingest).await;
        dir.delegate().merge_remote_state(
            br#"{"peer-1":{"type":"ingest","api_addr":"10.0.0.2","api_port":1}}"#,
            true,
        );
        assert!(!dir.endpoints(Role::Ingest).is_empty());

        dir.delegate().notify_leave("peer-1");
        assert!(dir
            .endpoints(Role::Ingest)
            .iter()
            .all(|e| e != "10.0.0.2:1"));
    }

    #[tokio::test]
    async fn unreachable_seeds_fail_construction() {
        let transport = Arc::new(InProcessTransport::new("self".into()));
        let result = Directory::join(
            transport,
            &["127.0.0.1:1".to_string()],
            Role::Ingest,
            "127.0.0.1".into(),
            9000,
            Arc::new(Metrics::new()),
        )
        .await;
        assert!(result.is_err());
    }
}
