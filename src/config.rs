use clap::Parser;
use std::net::IpAddr;
use std::time::Duration;

use crate::peer::Role;

/// Process-level configuration for the ingest coordination core. Parsed once
/// at startup and threaded through to the coordinator and the peer
/// directory; nothing in the core reads the environment directly.
#[derive(Debug, Clone, Parser)]
#[command(name = "ingestd", about = "Ingest coordination core")]
pub struct Config {
    /// Address the HTTP lease protocol binds to.
    #[arg(long, env = "INGESTD_HTTP_ADDR", default_value = "0.0.0.0")]
    pub http_addr: IpAddr,

    /// Port the HTTP lease protocol binds to.
    #[arg(long, env = "INGESTD_HTTP_PORT", default_value_t = 8090)]
    pub http_port: u16,

    /// Address the gossip transport binds to.
    #[arg(long, env = "INGESTD_GOSSIP_ADDR", default_value = "0.0.0.0")]
    pub gossip_addr: IpAddr,

    /// Port the gossip transport binds to.
    #[arg(long, env = "INGESTD_GOSSIP_PORT", default_value_t = 7090)]
    pub gossip_port: u16,

    /// Seed peers to contact on join, as `host:port`. May be repeated.
    #[arg(long = "seed", env = "INGESTD_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// Role this node advertises to the rest of the cluster.
    #[arg(long, env = "INGESTD_ROLE", default_value = "ingest")]
    pub role: Role,

    /// How long a reserved segment may sit un-acknowledged before the
    /// sweeper fails it.
    #[arg(long, env = "INGESTD_LEASE_TIMEOUT_SECS", default_value_t = 15)]
    pub lease_timeout_secs: u64,

    /// How often the deadline sweeper scans the lease table for expired
    /// reservations, independent of `lease_timeout_secs`.
    #[arg(long, env = "INGESTD_SWEEP_INTERVAL_SECS", default_value_t = 1)]
    pub sweep_interval_secs: u64,

    /// Log filter passed to `tracing_subscriber::EnvFilter`, overriding
    /// `RUST_LOG` when set explicitly.
    #[arg(long, env = "INGESTD_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
