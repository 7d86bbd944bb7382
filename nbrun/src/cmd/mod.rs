//! Subcommands of the `nbrun` CLI.

pub mod container;
pub mod describe;
pub mod download;
pub mod infra;
pub mod list_rules;
pub mod list_runs;
pub mod run;
pub mod schedule;
pub mod stop;
