//! Grbl-compatible front end for the Gantry motion core.

pub mod config;
pub mod protocol;

pub use config::Config;
pub use protocol::Protocol;
