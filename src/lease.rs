use crate::segment::SegmentHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, globally unique identifier assigned to a lease at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LeaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A server-side reservation of one segment to one consumer, bounded by a
/// deadline. Owned exclusively by the dispatcher. `segment` is an `Arc`, not
/// a `Box`, so `read` can hand a clone of it to the HTTP handler and let the
/// byte copy run outside the dispatcher's action loop.
pub struct Lease {
    pub segment: Arc<dyn SegmentHandle>,
    pub deadline: DateTime<Utc>,
    pub reading: bool,
}

impl Lease {
    pub fn new(segment: Arc<dyn SegmentHandle>, deadline: DateTime<Utc>) -> Self {
        Self {
            segment,
            deadline,
            reading: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline < now
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("deadline", &self.deadline)
            .field("reading", &self.reading)
            .finish()
    }
}
