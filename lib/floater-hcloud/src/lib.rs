//! Hetzner Cloud floating IP integration
pub mod client;
pub mod error;
pub mod floating_ips;

pub use client::{HcloudClient, DEFAULT_ENDPOINT};
pub use error::{HcloudError, Result};
