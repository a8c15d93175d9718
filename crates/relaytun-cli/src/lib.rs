//! `relaytun` CLI Library
//!
//! Subcommands backing the `relaytun` binary.

pub mod client_cmd;
pub mod peers_cmd;
pub mod subsystem_cmd;
