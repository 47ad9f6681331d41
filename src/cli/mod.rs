//! Command line interface for the node

pub mod commands;

pub use commands::run_cli;
