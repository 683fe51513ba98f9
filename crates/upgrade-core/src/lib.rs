pub mod config;
pub mod confirm;
pub mod device;
pub mod error;
pub mod installer;
pub mod io;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod provision;
pub mod report;
pub mod switchover;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod fake;

pub use error::{Result, UpgradeError};
