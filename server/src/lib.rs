//! Process bootstrap, telemetry, and the stdio wire protocol for
//! `workflow-server`. Split into a library so both the binary and the
//! integration test suite can exercise the same config/protocol code.

pub mod config;
pub mod protocol;
pub mod telemetry;

pub use config::Config;
pub use telemetry::init_telemetry;
