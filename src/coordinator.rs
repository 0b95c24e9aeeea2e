//! The four-endpoint HTTP lease protocol plus the two debug endpoints and
//! the metrics endpoint. Handlers submit to the [`dispatcher`] and translate
//! its `Result` into a status code and body at this boundary only.

use crate::dispatcher::{self, DispatcherHandle};
use crate::error::Error;
use crate::lease::LeaseId;
use crate::metrics::Metrics;
use crate::peer::Directory;
use crate::segment::SegmentLog;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Coordinator {
    dispatcher: DispatcherHandle,
    directory: Arc<Directory>,
    metrics: Arc<Metrics>,
}

impl Coordinator {
    pub fn spawn(
        segment_log: Arc<dyn SegmentLog>,
        lease_timeout: Duration,
        sweep_interval: Duration,
        directory: Arc<Directory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let dispatcher = dispatcher::spawn(segment_log, lease_timeout, sweep_interval, metrics.clone());
        Self {
            dispatcher,
            directory,
            metrics,
        }
    }

    /// Stop the underlying dispatcher, forcing every pending lease through
    /// the failed path. Synchronous: returns once drained.
    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/next", get(next))
            .route("/read", get(read))
            .route("/commit", post(commit))
            .route("/failed", post(failed))
            .route("/_segmentstatus", get(segment_status))
            .route("/_clusterstate", get(cluster_state))
            .route("/metrics", get(metrics))
            .with_state(self.clone())
            .layer(tower_http::trace::TraceLayer::new_for_http())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = err_status(&self);
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

fn parse_id(raw: &str) -> Result<LeaseId, Error> {
    raw.parse().map_err(|_| Error::MalformedId(raw.to_string()))
}

async fn next(State(coordinator): State<Coordinator>) -> Response {
    let started = Instant::now();
    let result = coordinator.dispatcher.next().await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(err) => err_status(err),
    };
    coordinator.metrics.observe_http("GET", "/next", status.as_u16(), started);
    match result {
        Ok(reserved) => (StatusCode::OK, reserved.id.to_string()).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn read(State(coordinator): State<Coordinator>, Query(q): Query<IdQuery>) -> Response {
    let started = Instant::now();
    // The grant only marks the lease `Reading`; the byte copy below happens
    // here, outside the dispatcher, so it never serializes with other
    // leases' actions or the sweeper.
    let result = async {
        let id = parse_id(&q.id)?;
        let grant = coordinator.dispatcher.read(id).await?;
        grant.segment.read().await
    }
    .await;
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(err) => err_status(err),
    };
    coordinator.metrics.observe_http("GET", "/read", status.as_u16(), started);
    match result {
        Ok(content) => (StatusCode::OK, content).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn commit(State(coordinator): State<Coordinator>, Query(q): Query<IdQuery>) -> Response {
    let started = Instant::now();
    let result = async {
        let id = parse_id(&q.id)?;
        coordinator.dispatcher.commit(id).await
    }
    .await;
    let status = match &result {
        Ok(()) => StatusCode::OK,
        Err(err) => err_status(err),
    };
    coordinator.metrics.observe_http("POST", "/commit", status.as_u16(), started);
    match result {
        Ok(()) => (StatusCode::OK, "Commit OK").into_response(),
        Err(err) => err.into_response(),
    }
}

async fn failed(State(coordinator): State<Coordinator>, Query(q): Query<IdQuery>) -> Response {
    let started = Instant::now();
    let result = async {
        let id = parse_id(&q.id)?;
        coordinator.dispatcher.failed(id).await
    }
    .await;
    let status = match &result {
        Ok(()) => StatusCode::OK,
        Err(err) => err_status(err),
    };
    coordinator.metrics.observe_http("POST", "/failed", status.as_u16(), started);
    match result {
        Ok(()) => (StatusCode::OK, "Failed OK").into_response(),
        Err(err) => err.into_response(),
    }
}

async fn segment_status(State(coordinator): State<Coordinator>) -> String {
    let pending = coordinator.dispatcher.status().await;
    let mut out = format!("{} pending\n", pending.len());
    for (id, reading, deadline) in pending {
        out.push_str(&format!(" {id}: reading={reading} deadline={deadline:?}\n"));
    }
    out
}

async fn cluster_state(State(coordinator): State<Coordinator>) -> Response {
    let snapshot = coordinator.directory.state();
    (
        [("content-type", "application/json; charset=utf-8")],
        serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string()),
    )
        .into_response()
}

async fn metrics(State(coordinator): State<Coordinator>) -> String {
    coordinator.metrics.render()
}

fn err_status(err: &Error) -> StatusCode {
    match err {
        Error::NoSegmentsAvailable | Error::UnknownLease(_) | Error::MalformedId(_) => {
            StatusCode::NOT_FOUND
        }
        Error::NotYetRead => StatusCode::PRECONDITION_REQUIRED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
