//! The segment log is an external collaborator: durable storage, segment
//! selection, and the commit/fail primitives live outside this crate. The
//! coordinator only needs the capability set below.

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A reserved, as-yet-undecided segment handle returned by `SegmentLog::oldest`.
///
/// `commit` and `failed` are terminal and mutually exclusive; the log must
/// guarantee the same segment is never handed to two concurrent callers of
/// `oldest` until one of them reaches a terminal state.
#[async_trait]
pub trait SegmentHandle: Send + Sync {
    /// Read the segment's bytes. Readable once; the coordinator calls this
    /// exactly once per lease, outside the dispatcher.
    async fn read(&self) -> Result<Bytes>;

    /// Mark the segment durably consumed.
    async fn commit(&self) -> Result<()>;

    /// Return the segment to the pool for reconsumption.
    async fn failed(&self) -> Result<()>;
}

#[async_trait]
pub trait SegmentLog: Send + Sync {
    /// Reserve the oldest unclaimed segment. Returns
    /// `Err(Error::NoSegmentsAvailable)` when the log is empty.
    ///
    /// Returns an `Arc` rather than a `Box` because the dispatcher holds this
    /// handle in the lease table and also hands a clone of it to the HTTP
    /// handler so the handler can stream bytes outside the dispatcher.
    async fn oldest(&self) -> Result<Arc<dyn SegmentHandle>>;
}

/// Deterministic, in-process segment log used by tests. Segments are
/// reconsumed (pushed back to the front of the queue) when `failed` is
/// called, mirroring the "idempotence is not required, but failed-then-retry
/// must work" contract in the spec.
pub struct InMemorySegmentLog {
    queue: Arc<Mutex<VecDeque<Bytes>>>,
}

impl InMemorySegmentLog {
    pub fn new<I, B>(segments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            queue: Arc::new(Mutex::new(segments.into_iter().map(Into::into).collect())),
        }
    }

    pub fn empty() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
        }
    }
}

#[async_trait]
impl SegmentLog for InMemorySegmentLog {
    async fn oldest(&self) -> Result<Arc<dyn SegmentHandle>> {
        let content = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(Error::NoSegmentsAvailable)?;
        Ok(Arc::new(InMemorySegmentHandle {
            content,
            queue: self.queue.clone(),
        }))
    }
}

/// A handle bound to an [`InMemorySegmentLog`]'s queue; `failed` re-enqueues
/// the content so the next `oldest` call can hand out the same bytes again
/// under a fresh lease id.
pub struct InMemorySegmentHandle {
    content: Bytes,
    queue: Arc<Mutex<VecDeque<Bytes>>>,
}

#[async_trait]
impl SegmentHandle for InMemorySegmentHandle {
    async fn read(&self) -> Result<Bytes> {
        Ok(self.content.clone())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn failed(&self) -> Result<()> {
        self.queue.lock().unwrap().push_front(self.content.clone());
        Ok(())
    }
}

/// A handle whose `read` blocks until released, used by the dispatcher's
/// tests to prove a slow byte copy never stalls an unrelated action.
#[cfg(test)]
pub struct BlockingSegmentHandle {
    pub notify: Arc<tokio::sync::Notify>,
    pub content: Bytes,
}

#[cfg(test)]
#[async_trait]
impl SegmentHandle for BlockingSegmentHandle {
    async fn read(&self) -> Result<Bytes> {
        self.notify.notified().await;
        Ok(self.content.clone())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn failed(&self) -> Result<()> {
        Ok(())
    }
}

/// Hands out one [`BlockingSegmentHandle`] on its first `oldest` call, then
/// falls through to `rest` for every call after.
#[cfg(test)]
pub struct SequencedSegmentLog {
    pub first: std::sync::Mutex<Option<Arc<dyn SegmentHandle>>>,
    pub rest: InMemorySegmentLog,
}

#[cfg(test)]
#[async_trait]
impl SegmentLog for SequencedSegmentLog {
    async fn oldest(&self) -> Result<Arc<dyn SegmentHandle>> {
        if let Some(handle) = self.first.lock().unwrap().take() {
            return Ok(handle);
        }
        self.rest.oldest().await
    }
}
