pub mod catalog;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod reliability;
pub mod sensors;
pub mod session;
pub mod telemetry;
pub mod verify;
