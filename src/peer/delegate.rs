//! The callback interface the gossip transport drives. Names mirror the
//! eight callbacks the spec lists verbatim (`NodeMeta`, `NotifyMsg`,
//! `GetBroadcasts`, `LocalState`, `MergeRemoteState`, `NotifyJoin`,
//! `NotifyUpdate`, `NotifyLeave`), in `snake_case`.
//!
//! Every method here must return quickly: the transport's event loop calls
//! these inline and blocking it stalls gossip for the whole cluster.

use crate::metrics::Metrics;
use crate::peer::record::PeerRecord;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::warn;

pub trait Delegate: Send + Sync {
    fn node_meta(&self, limit: usize) -> Vec<u8>;
    fn notify_msg(&self, msg: &[u8]);
    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>>;
    fn local_state(&self, join: bool) -> Vec<u8>;
    fn merge_remote_state(&self, buf: &[u8], join: bool);
    fn notify_join(&self, name: &str);
    fn notify_update(&self, name: &str);
    fn notify_leave(&self, name: &str);
}

/// An outbound buffer of pending broadcasts, each under a node's own size
/// budget. The transport drains it via `get_broadcasts`, respecting its
/// `overhead` (per-message framing cost) and `limit` (total budget for this
/// gossip round) constraints.
///
/// Must be constructed before the gossip transport's listener starts: the
/// transport may call `get_broadcasts` immediately on startup, and a queue
/// built lazily on first callback would race with that call. Callers
/// therefore build this synchronously inside `Directory::join`, before
/// handing the delegate to the transport.
pub struct BroadcastQueue {
    pending: Mutex<VecDeque<Vec<u8>>>,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, payload: Vec<u8>) {
        self.pending.lock().unwrap().push_back(payload);
    }

    /// Drain as many queued messages as fit under `limit`, each paying
    /// `overhead` bytes of framing. Messages that individually exceed the
    /// budget are dropped rather than blocking the round forever.
    pub fn drain(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        let mut pending = self.pending.lock().unwrap();
        let mut out = Vec::new();
        let mut used = 0usize;
        while let Some(msg) = pending.front() {
            let cost = msg.len() + overhead;
            if used + cost > limit {
                break;
            }
            used += cost;
            out.push(pending.pop_front().unwrap());
        }
        out
    }
}

impl Default for BroadcastQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The gossip wire payload: a JSON object mapping node name to its
/// [`PeerRecord`]. Empty payloads are valid and ignored. Unknown fields in
/// each record are tolerated by `serde`'s default (non-`deny_unknown_fields`)
/// behavior.
pub type WireState = HashMap<String, PeerRecord>;

/// Implements [`Delegate`] against the directory's shared table. Lives
/// alongside `PeerDirectory` rather than inside it so the callback surface
/// (driven by the transport, on its own task) is visually separate from the
/// query surface (driven by callers of `Directory`).
pub struct PeerDelegate {
    table: super::SharedTable,
    queue: BroadcastQueue,
    metrics: std::sync::Arc<Metrics>,
}

impl PeerDelegate {
    pub fn new(table: super::SharedTable, queue: BroadcastQueue, metrics: std::sync::Arc<Metrics>) -> Self {
        Self { table, queue, metrics }
    }

    pub fn queue(&self) -> &BroadcastQueue {
        &self.queue
    }

    fn upsert_all(&self, state: WireState) {
        if state.is_empty() {
            return;
        }
        let mut table = self.table.write();
        for (name, record) in state {
            table.insert(name, record);
        }
    }
}

impl Delegate for PeerDelegate {
    fn node_meta(&self, _limit: usize) -> Vec<u8> {
        self.metrics.gossip_callback("NodeMeta");
        Vec::new()
    }

    fn notify_msg(&self, msg: &[u8]) {
        self.metrics.gossip_callback("NotifyMsg");
        if msg.is_empty() {
            return;
        }
        match serde_json::from_slice::<WireState>(msg) {
            Ok(state) => self.upsert_all(state),
            Err(err) => warn!(error = %err, "dropping malformed gossip message"),
        }
    }

    fn get_broadcasts(&self, overhead: usize, limit: usize) -> Vec<Vec<u8>> {
        self.metrics.gossip_callback("GetBroadcasts");
        self.queue.drain(overhead, limit)
    }

    fn local_state(&self, _join: bool) -> Vec<u8> {
        self.metrics.gossip_callback("LocalState");
        let table = self.table.read();
        serde_json::to_vec(&*table).unwrap_or_default()
    }

    fn merge_remote_state(&self, buf: &[u8], _join: bool) {
        self.metrics.gossip_callback("MergeRemoteState");
        if buf.is_empty() {
            return;
        }
        match serde_json::from_slice::<WireState>(buf) {
            Ok(state) => self.upsert_all(state),
            Err(err) => warn!(error = %err, "dropping malformed gossip push-pull state"),
        }
    }

    fn notify_join(&self, _name: &str) {
        self.metrics.gossip_callback("NotifyJoin");
    }

    fn notify_update(&self, _name: &str) {
        self.metrics.gossip_callback("NotifyUpdate");
    }

    fn notify_leave(&self, name: &str) {
        self.metrics.gossip_callback("NotifyLeave");
        self.table.write().remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::record::Role;
    use std::sync::Arc;

    fn delegate() -> PeerDelegate {
        PeerDelegate::new(
            Arc::new(parking_lot::RwLock::new(HashMap::new())),
            BroadcastQueue::new(),
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn empty_payload_is_ignored() {
        let d = delegate();
        d.notify_msg(&[]);
        assert!(d.table.read().is_empty());
    }

    #[test]
    fn malformed_payload_is_dropped_not_fatal() {
        let d = delegate();
        d.notify_msg(b"not json");
        assert!(d.table.read().is_empty());
    }

    #[test]
    fn merge_never_deletes() {
        let d = delegate();
        d.table.write().insert(
            "a".into(),
            PeerRecord { role: Role::Ingest, api_addr: "10.0.0.1".into(), api_port: 1 },
        );
        d.merge_remote_state(b"{}", true);
        assert_eq!(d.table.read().len(), 1);
    }

    #[test]
    fn leave_removes_the_departing_node() {
        let d = delegate();
        d.table.write().insert(
            "a".into(),
            PeerRecord { role: Role::Ingest, api_addr: "10.0.0.1".into(), api_port: 1 },
        );
        d.notify_leave("a");
        assert!(d.table.read().is_empty());
    }

    #[test]
    fn broadcast_queue_respects_limit() {
        let q = BroadcastQueue::new();
        q.push(vec![0u8; 10]);
        q.push(vec![0u8; 10]);
        let drained = q.drain(2, 15);
        assert_eq!(drained.len(), 1);
    }
}
