//! Ingestion poller.
//!
//! Lists work items on a fixed interval and hands every unseen item to an
//! [`ItemHandler`], never running more than `max_concurrent` handlers at
//! once. An item is marked processed before its handler is spawned, so
//! overlapping ticks cannot dispatch it twice.

mod config;
mod dependencies;
mod labels;
mod runner;
mod types;

pub use config::PollerConfig;
pub use dependencies::parse_dependencies;
pub use labels::StatusLabeler;
pub use runner::Poller;
pub use types::{ItemHandler, PollerStatus, StatusLabels};
