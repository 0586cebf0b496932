// Library target holds everything the commands share; the binary entry point
// and per-command modules live next to main.rs.

pub mod artifacts;
pub mod cdp;
pub mod chrome;
pub mod config;
pub mod error;
pub mod field;
pub mod inspect;
pub mod logging;
pub mod monitor;
pub mod report;
pub mod session;
pub mod wait;
