//! Robot discovery for the local network.
//!
//! Robots advertise their HTTP API over mDNS. The client browses for those
//! advertisements, polls every known address's health endpoints, reconciles
//! addresses that report the same robot name into one robot, and calls back
//! whenever the resulting robot list changes.
//!
//! ```no_run
//! use discovery_client::{Config, DiscoveryClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut client = DiscoveryClient::new(|robots| {
//!         for robot in robots {
//!             println!("{} ({} addresses)", robot.name, robot.addresses.len());
//!         }
//!     });
//!
//!     client.start(Config::default()).await?;
//!     tokio::signal::ctrl_c().await?;
//!     client.stop().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod mdns;
pub mod serial;
pub mod store;
pub mod store_manager;

pub use client::{DiscoveryClient, ListChangeCallback};
pub use config::Config;
pub use error::{DiscoveryError, Result};
pub use shared::types::{Address, HealthStatus, PortInfo, Robot};
