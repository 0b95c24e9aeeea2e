//! The single-threaded serialization point that owns the Lease Table.
//!
//! Every table read or mutation happens on one logical task: handlers submit
//! a closure-like [`Action`] over an mpsc channel and await the response on a
//! oneshot channel. This keeps the table lock-free by construction and gives
//! lease transitions a total order — the order actions are dequeued in.

use crate::error::{Error, Result};
use crate::lease::{Lease, LeaseId};
use crate::metrics::Metrics;
use crate::segment::{SegmentHandle, SegmentLog};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Outcome of a successful `next` dispatch.
pub struct Reserved {
    pub id: LeaseId,
}

/// Outcome of a successful `read` dispatch. Marks the lease `Reading` inside
/// the dispatcher, but carries only a handle to the segment — the actual
/// byte copy happens outside the dispatcher's action loop, in the caller, so
/// a large segment never stalls other leases' `next`/`commit`/`failed` or the
/// sweeper.
pub struct ReadGrant {
    pub segment: Arc<dyn SegmentHandle>,
}

enum Action {
    Next {
        reply: oneshot::Sender<Result<Reserved>>,
    },
    Read {
        id: LeaseId,
        reply: oneshot::Sender<Result<ReadGrant>>,
    },
    Commit {
        id: LeaseId,
        reply: oneshot::Sender<Result<()>>,
    },
    Failed {
        id: LeaseId,
        reply: oneshot::Sender<Result<()>>,
    },
    Status {
        reply: oneshot::Sender<Vec<(LeaseId, bool, DateTime<Utc>)>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// A handle to the running dispatcher task. Cloning is cheap; every clone
/// shares the same mpsc sender and therefore the same serialization point.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Action>,
}

impl DispatcherHandle {
    pub async fn next(&self) -> Result<Reserved> {
        let (reply, rx) = oneshot::channel();
        self.send(Action::Next { reply }, rx).await
    }

    pub async fn read(&self, id: LeaseId) -> Result<ReadGrant> {
        let (reply, rx) = oneshot::channel();
        self.send(Action::Read { id, reply }, rx).await
    }

    pub async fn commit(&self, id: LeaseId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Action::Commit { id, reply }, rx).await
    }

    pub async fn failed(&self, id: LeaseId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Action::Failed { id, reply }, rx).await
    }

    pub async fn status(&self) -> Vec<(LeaseId, bool, DateTime<Utc>)> {
        let (reply, rx) = oneshot::channel();
        let _ = self.tx.send(Action::Status { reply }).await;
        rx.await.unwrap_or_default()
    }

    /// Force every pending lease through the failed path, then stop the
    /// dispatcher loop. Synchronous: returns only once the loop has exited.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Action::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send<T>(&self, action: Action, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.tx
            .send(action)
            .await
            .map_err(|_| Error::SegmentLog("dispatcher is no longer running".into()))?;
        rx.await
            .map_err(|_| Error::SegmentLog("dispatcher dropped the response channel".into()))?
    }
}

/// Spawns the dispatcher task and its sweeper tick, returning a handle for
/// HTTP handlers to submit actions against. `sweep_interval` is how often the
/// deadline sweep runs, independent of `lease_timeout`.
pub fn spawn(
    segment_log: Arc<dyn SegmentLog>,
    lease_timeout: Duration,
    sweep_interval: Duration,
    metrics: Arc<Metrics>,
) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(run(rx, segment_log, lease_timeout, sweep_interval, metrics));
    DispatcherHandle { tx }
}

async fn run(
    mut rx: mpsc::Receiver<Action>,
    segment_log: Arc<dyn SegmentLog>,
    lease_timeout: Duration,
    sweep_interval: Duration,
    metrics: Arc<Metrics>,
) {
    let mut table: HashMap<LeaseId, Lease> = HashMap::new();
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!("dispatcher started");

    loop {
        tokio::select! {
            action = rx.recv() => {
                match action {
                    Some(Action::Stop { reply }) => {
                        force_fail_all(&mut table, lease_timeout, &metrics).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(action) => handle(action, &mut table, &segment_log, lease_timeout, &metrics).await,
                    None => break,
                }
            }
            _ = ticker.tick() => {
                sweep(&mut table, &metrics).await;
            }
        }
    }

    info!("dispatcher stopped");
}

async fn handle(
    action: Action,
    table: &mut HashMap<LeaseId, Lease>,
    segment_log: &Arc<dyn SegmentLog>,
    lease_timeout: Duration,
    metrics: &Metrics,
) {
    match action {
        Action::Next { reply } => {
            let outcome = match segment_log.oldest().await {
                Ok(segment) => {
                    let id = LeaseId::new();
                    let deadline = Utc::now()
                        + ChronoDuration::from_std(lease_timeout).unwrap_or(ChronoDuration::zero());
                    table.insert(id, Lease::new(segment, deadline));
                    metrics.lease_transition("Pending", "request");
                    debug!(lease_id = %id, "reserved segment");
                    Ok(Reserved { id })
                }
                Err(err) => Err(err),
            };
            let _ = reply.send(outcome);
        }
        Action::Read { id, reply } => {
            // No `.await` against the segment here: the dispatcher only
            // flips the `reading` flag and hands out a clone of the segment
            // handle. The caller performs the actual byte copy against that
            // handle after this reply is sent, off the dispatcher's task.
            let outcome = (|| {
                let lease = table.get_mut(&id).ok_or(Error::UnknownLease(id))?;
                if lease.reading {
                    return Err(Error::AlreadyReading);
                }
                lease.reading = true;
                metrics.lease_transition("Reading", "request");
                Ok(ReadGrant { segment: lease.segment.clone() })
            })();
            let _ = reply.send(outcome);
        }
        Action::Commit { id, reply } => {
            let outcome = (|| async {
                let lease = table.get(&id).ok_or(Error::UnknownLease(id))?;
                if !lease.reading {
                    return Err(Error::NotYetRead);
                }
                metrics.lease_transition("Commit", "request");
                lease.segment.commit().await?;
                Ok(())
            })()
            .await;
            if outcome.is_ok() {
                table.remove(&id);
            }
            let _ = reply.send(outcome);
        }
        Action::Failed { id, reply } => {
            let outcome = (|| async {
                let lease = table.get(&id).ok_or(Error::UnknownLease(id))?;
                metrics.lease_transition("Failed", "request");
                lease.segment.failed().await?;
                Ok(())
            })()
            .await;
            if outcome.is_ok() {
                table.remove(&id);
            }
            let _ = reply.send(outcome);
        }
        Action::Status { reply } => {
            let snapshot = table
                .iter()
                .map(|(id, lease)| (*id, lease.reading, lease.deadline))
                .collect();
            let _ = reply.send(snapshot);
        }
        Action::Stop { reply } => {
            // Handled in the run loop directly; unreachable here.
            let _ = reply.send(());
        }
    }
}

async fn sweep(table: &mut HashMap<LeaseId, Lease>, metrics: &Metrics) {
    let now = Utc::now();
    let expired: Vec<LeaseId> = table
        .iter()
        .filter(|(_, lease)| lease.is_expired(now))
        .map(|(id, _)| *id)
        .collect();

    if expired.is_empty() {
        return;
    }

    for id in &expired {
        let lease = table.remove(id).expect("id came from this table");
        if let Err(err) = lease.segment.failed().await {
            error!(lease_id = %id, error = %err, "segment log rejected a sweeper failed() call");
            panic!("sweeper Failed() error is a programming fault: {err}");
        }
        metrics.lease_transition("Failed", "timeout");
    }
    warn!(count = expired.len(), "sweeper expired leases past their deadline");
}

/// Shutdown path: sweep with a clock advanced 10x the lease timeout so every
/// remaining lease is unconditionally past its deadline, then drain.
async fn force_fail_all(table: &mut HashMap<LeaseId, Lease>, lease_timeout: Duration, metrics: &Metrics) {
    let advance = ChronoDuration::from_std(lease_timeout * 10).unwrap_or(ChronoDuration::zero());
    let forced_now = Utc::now() + advance;
    let ids: Vec<LeaseId> = table.keys().copied().collect();
    for id in ids {
        let lease = table.remove(&id).expect("id came from this table");
        debug_assert!(lease.is_expired(forced_now) || lease.deadline <= forced_now);
        if let Err(err) = lease.segment.failed().await {
            error!(lease_id = %id, error = %err, "segment log rejected a shutdown failed() call");
            panic!("shutdown Failed() error is a programming fault: {err}");
        }
        metrics.lease_transition("Failed", "timeout");
    }
    info!("shutdown forced all pending leases through failed()");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{BlockingSegmentHandle, InMemorySegmentLog, SequencedSegmentLog};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::Notify;

    const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

    fn test_metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new())
    }

    #[tokio::test]
    async fn happy_path() {
        let log = Arc::new(InMemorySegmentLog::new(["a", "b"]));
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        let reserved = handle.next().await.unwrap();
        let grant = handle.read(reserved.id).await.unwrap();
        assert_eq!(grant.segment.read().await.unwrap(), Bytes::from_static(b"a"));
        handle.commit(reserved.id).await.unwrap();

        let reserved2 = handle.next().await.unwrap();
        let grant2 = handle.read(reserved2.id).await.unwrap();
        assert_eq!(grant2.segment.read().await.unwrap(), Bytes::from_static(b"b"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn commit_before_read_is_rejected() {
        let log = Arc::new(InMemorySegmentLog::new(["a"]));
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        let reserved = handle.next().await.unwrap();
        let err = handle.commit(reserved.id).await.unwrap_err();
        assert!(matches!(err, Error::NotYetRead));

        handle.stop().await;
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let log = Arc::new(InMemorySegmentLog::empty());
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        let bogus = LeaseId::new();
        assert!(matches!(handle.commit(bogus).await, Err(Error::UnknownLease(_))));
        assert!(matches!(handle.failed(bogus).await, Err(Error::UnknownLease(_))));
        assert!(matches!(handle.read(bogus).await, Err(Error::UnknownLease(_))));

        handle.stop().await;
    }

    #[tokio::test]
    async fn double_read_rejects_the_second_caller() {
        let log = Arc::new(InMemorySegmentLog::new(["a"]));
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        let reserved = handle.next().await.unwrap();
        handle.read(reserved.id).await.unwrap();
        let err = handle.read(reserved.id).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyReading));

        handle.stop().await;
    }

    #[tokio::test]
    async fn empty_log_reports_no_segments() {
        let log = Arc::new(InMemorySegmentLog::empty());
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        assert!(matches!(handle.next().await, Err(Error::NoSegmentsAvailable)));

        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_fails_every_pending_lease() {
        let log = Arc::new(InMemorySegmentLog::new(["a", "b"]));
        let handle = spawn(log.clone(), Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        handle.next().await.unwrap();
        handle.next().await.unwrap();
        handle.stop().await;

        // Both segments were returned to the log by the forced failed() path.
        let log2 = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());
        assert!(log2.next().await.is_ok());
        assert!(log2.next().await.is_ok());
        log2.stop().await;
    }

    fn sequenced_log(notify: Arc<Notify>) -> Arc<SequencedSegmentLog> {
        Arc::new(SequencedSegmentLog {
            first: std::sync::Mutex::new(Some(Arc::new(BlockingSegmentHandle {
                notify,
                content: Bytes::from_static(b"slow"),
            }))),
            rest: InMemorySegmentLog::new(["second"]),
        })
    }

    #[tokio::test]
    async fn read_does_not_block_the_dispatcher() {
        let notify = Arc::new(Notify::new());
        let log = sequenced_log(notify.clone());
        let handle = spawn(log, Duration::from_secs(30), SWEEP_INTERVAL, test_metrics());

        let reserved = handle.next().await.unwrap();
        let grant = handle.read(reserved.id).await.unwrap();

        // The byte copy runs on its own task, outside the dispatcher, and
        // won't resolve until `notify` fires.
        let read_task = tokio::spawn(async move { grant.segment.read().await });

        // While that copy is still blocked, the dispatcher must still answer
        // an unrelated request immediately rather than waiting on it.
        let unrelated = tokio::time::timeout(Duration::from_millis(200), handle.next()).await;
        assert!(unrelated.unwrap().is_ok(), "dispatcher stalled while a read was in flight");

        notify.notify_one();
        assert_eq!(read_task.await.unwrap().unwrap(), Bytes::from_static(b"slow"));

        handle.stop().await;
    }

    #[tokio::test]
    async fn sweeper_can_fail_a_lease_while_its_read_is_in_flight() {
        let notify = Arc::new(Notify::new());
        let log = sequenced_log(notify.clone());
        let handle = spawn(
            log,
            Duration::from_millis(10),
            Duration::from_millis(50),
            test_metrics(),
        );

        let reserved = handle.next().await.unwrap();
        let grant = handle.read(reserved.id).await.unwrap();
        let read_task = tokio::spawn(async move { grant.segment.read().await });

        // Give the lease's deadline time to pass and the sweeper time to run
        // while the read above is still blocked on `notify`.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.status().await.is_empty(), "sweeper should have failed the lease");

        // The in-flight read is unaffected by the table removal: it still
        // completes against the handle it was granted.
        notify.notify_one();
        assert_eq!(read_task.await.unwrap().unwrap(), Bytes::from_static(b"slow"));

        handle.stop().await;
    }
}
