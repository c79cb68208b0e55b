//! CLI module for autorank - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands to serve the webhook
//! routes, run a one-off full resort, and inspect the resolved config.

pub mod commands;

pub use commands::Cli;
