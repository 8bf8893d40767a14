//! Command implementations
//!
//! Each module corresponds to a subcommand in the CLI.

pub mod progress;
pub mod run;
