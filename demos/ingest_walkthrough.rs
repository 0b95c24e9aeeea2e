//! Walks the happy path of the ingest coordination core against an
//! in-process segment log and a single-node directory: reserve a segment,
//! read it, commit it, then show the sweeper failing an unread reservation
//! once its deadline passes.

use ingestd::dispatcher;
use ingestd::metrics::Metrics;
use ingestd::peer::{Directory, InProcessTransport, Role};
use ingestd::segment::InMemorySegmentLog;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("ingest coordination core walkthrough");
    println!("-------------------------------------");

    let metrics = Arc::new(Metrics::new());
    let log = Arc::new(InMemorySegmentLog::new(vec![
        b"segment-one".to_vec(),
        b"segment-two".to_vec(),
    ]));

    let directory = Directory::join(
        Arc::new(InProcessTransport::new(Uuid::new_v4().to_string())),
        &[],
        Role::Ingest,
        "127.0.0.1".to_string(),
        8090,
        metrics.clone(),
    )
    .await?;
    println!("joined directory as {} (size {})", directory.name(), directory.size());

    let sweep_interval = Duration::from_millis(100);
    let handle = dispatcher::spawn(log, Duration::from_millis(200), sweep_interval, metrics);

    let reserved = handle.next().await?;
    println!("reserved lease {}", reserved.id);

    let grant = handle.read(reserved.id).await?;
    let content = grant.segment.read().await?;
    println!("read {} bytes", content.len());

    handle.commit(reserved.id).await?;
    println!("committed {}", reserved.id);

    let second = handle.next().await?;
    println!("reserved second lease {}, leaving it unread", second.id);

    println!("waiting for the sweeper to expire the unread lease...");
    tokio::time::sleep(Duration::from_millis(400)).await;

    let pending = handle.status().await;
    println!("{} lease(s) still pending after the sweep", pending.len());
    assert!(pending.is_empty());

    handle.stop().await;
    directory.leave(Duration::from_secs(1)).await?;
    println!("walkthrough complete");

    Ok(())
}
