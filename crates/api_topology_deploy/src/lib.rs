//! AWS adapters, handlers and binaries for API topology delivery.
//!
//! Pure topology and pipeline logic lives in `api_topology_core`. This crate
//! owns the collaborators around it: the provisioning engine, the parameter
//! store, artifact storage, the notification channel and external processes.

pub mod adapters;
pub mod error;
pub mod handlers;
pub mod logging;
