use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of API a peer serves. Wire representation is a string literal:
/// `ingest`, `store`, or `ingeststore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Ingest,
    Store,
    #[serde(rename = "ingeststore")]
    #[value(name = "ingest-store")]
    IngestStore,
}

impl Role {
    /// Does a peer advertising `self` satisfy a request for `requested`?
    ///
    /// `ingest` matches `ingest` and `ingest-store`; `store` matches `store`
    /// and `ingest-store`; `ingest-store` matches only `ingest-store`.
    pub fn satisfies(self, requested: Role) -> bool {
        match requested {
            Role::Ingest => matches!(self, Role::Ingest | Role::IngestStore),
            Role::Store => matches!(self, Role::Store | Role::IngestStore),
            Role::IngestStore => matches!(self, Role::IngestStore),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Ingest => "ingest",
            Role::Store => "store",
            Role::IngestStore => "ingeststore",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(Role::Ingest),
            "store" => Ok(Role::Store),
            "ingeststore" | "ingest-store" => Ok(Role::IngestStore),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// A small record each node advertises over gossip: what it serves and
/// where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "type")]
    pub role: Role,
    pub api_addr: String,
    pub api_port: u16,
}

impl PeerRecord {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.api_addr, self.api_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_matching_rules() {
        assert!(Role::Ingest.satisfies(Role::Ingest));
        assert!(!Role::Ingest.satisfies(Role::Store));
        assert!(Role::IngestStore.satisfies(Role::Ingest));
        assert!(Role::IngestStore.satisfies(Role::Store));
        assert!(Role::IngestStore.satisfies(Role::IngestStore));
        assert!(!Role::Ingest.satisfies(Role::IngestStore));
    }

    #[test]
    fn role_wire_format() {
        let json = serde_json::to_string(&Role::IngestStore).unwrap();
        assert_eq!(json, "\"ingeststore\"");
    }
}
