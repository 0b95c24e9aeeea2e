use thiserror::Error;

/// Crate-wide error type. HTTP handlers translate variants to status codes
/// at the boundary (see `coordinator::http`); nothing upstream of that
/// boundary matches on status codes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no segments available")]
    NoSegmentsAvailable,

    #[error("segment log error: {0}")]
    SegmentLog(String),

    #[error("unknown lease {0}")]
    UnknownLease(crate::lease::LeaseId),

    #[error("malformed lease id {0:?}")]
    MalformedId(String),

    #[error("another client is already reading this segment")]
    AlreadyReading,

    #[error("segment hasn't been read yet; can't commit")]
    NotYetRead,

    #[error("gossip error: {0}")]
    Gossip(String),

    #[error("broadcast queue requested before directory initialization")]
    NotReady,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
