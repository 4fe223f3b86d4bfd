//! Command line configuration

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

/// Keeps Hetzner Cloud floating IPs attached to the node MetalLB announces from
#[derive(Parser, Debug)]
#[command(name = "hcloud-metallb-floater", version, about)]
pub struct Args {
    /// Hetzner Cloud API token
    #[arg(long, env = "HCLOUD_TOKEN", hide_env_values = true)]
    pub hcloud_token: String,

    /// Override the Hetzner Cloud API endpoint
    #[arg(long, env = "HCLOUD_ENDPOINT")]
    pub hcloud_endpoint: Option<String>,

    /// The address the metrics endpoint binds to, `:PORT` binds all interfaces
    #[arg(long, default_value = ":8585", value_parser = parse_bind_addr)]
    pub metrics_addr: SocketAddr,

    /// Enable leader election, ensuring only one active controller
    #[arg(long)]
    pub enable_leader_election: bool,

    /// Namespace holding the leader election Lease
    #[arg(long, default_value = "kube-system")]
    pub leader_election_namespace: String,

    /// Name of the leader election Lease
    #[arg(long, default_value = "hcloud-metallb-floater-controller")]
    pub leader_election_id: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Resync period of the controller in seconds
    #[arg(long, default_value = "300", value_name = "SECONDS")]
    pub sync_period: u64,
}

impl Args {
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period)
    }

    /// Default log filter when RUST_LOG is unset
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "info,hcloud_metallb_floater=debug,floater_core=debug,floater_hcloud=debug"
        } else {
            "info"
        }
    }
}

/// Parse `HOST:PORT`, or `:PORT` for every IPv4 interface
fn parse_bind_addr(value: &str) -> Result<SocketAddr, String> {
    let value = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => value.to_string(),
    };
    value
        .parse()
        .map_err(|e| format!("invalid bind address '{}': {}", value, e))
}
