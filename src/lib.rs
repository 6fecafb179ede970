//! LKE driver - cluster lifecycle for Linode Kubernetes Engine
//!
//! The driver creates, converges, resizes and deletes LKE clusters on behalf
//! of a cluster-management host, and bootstraps an admin service-account token
//! on each cluster it provisions. It keeps no state of its own: everything it
//! needs between calls is encoded in the host's [`state::ClusterInfo`] record.
//!
//! # Modules
//!
//! - [`controller`] - Lifecycle entry points and node-pool reconciliation
//! - [`provider`] - Linode API client and wire types
//! - [`bootstrap`] - Service-account token bootstrap on provisioned clusters
//! - [`poll`] - Readiness poller shared by every wait
//! - [`options`] - Host options, driver flags and capabilities
//! - [`state`] - Codec for the state persisted in the host record
//! - [`server`] - HTTP/JSON adapter for the host
//! - [`config`] - Process configuration
//! - [`error`] - Error types for the driver

#![deny(missing_docs)]

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod error;
pub mod options;
pub mod poll;
pub mod provider;
pub mod server;
pub mod state;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
