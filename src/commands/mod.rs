//! CLI command implementations.
//!
//! Each submodule wires one `agentbox` subcommand to the engine, keeping
//! output formatting in pure functions next to it.

pub mod down;
pub mod init;
pub mod shell;
pub mod status;
pub mod up;
