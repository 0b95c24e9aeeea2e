//! The gossip transport is an external collaborator, same footing as the
//! segment log: this crate does not implement SWIM/gossip wire protocol. It
//! only specifies the capability set the transport must offer and the
//! [`Delegate`](super::delegate::Delegate) callbacks it must drive.
//!
//! In production this trait is satisfied by a real membership transport.
//! Tests and the walkthrough example use [`InProcessTransport`], a
//! single-node stand-in with no network I/O, mirroring the donor's
//! `InMemoryStorage` test double for its own external collaborator.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// This node's cluster-unique name, generated at join time.
    fn local_name(&self) -> &str;

    /// Current membership count as observed by this node.
    fn size(&self) -> usize;

    /// Gracefully notify peers and stop, bounded by `timeout`.
    async fn leave(&self, timeout: Duration) -> Result<()>;
}

/// A transport with no peers but itself. `size()` is always 1; `leave` is an
/// immediate no-op. Useful for unit tests of the directory's own table logic
/// and for single-node demos, where join/leave propagation is not under
/// test.
pub struct InProcessTransport {
    name: String,
}

impl InProcessTransport {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl GossipTransport for InProcessTransport {
    fn local_name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> usize {
        1
    }

    async fn leave(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}
