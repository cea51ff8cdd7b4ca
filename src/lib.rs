//! Backup, export and retention orchestration for RestorePoint appliances.
//!
//! - [`core`]: device directory, backup orchestrator, export coordinator and
//!   retention pruner
//! - [`rpc`]: the appliance session and typed commands
//! - [`cli`]: the subcommands of the `rpctl` binary

pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
pub mod rpc;
