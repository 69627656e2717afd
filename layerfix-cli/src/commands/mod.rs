//! Subcommand handlers

pub mod config;
pub mod patch;
pub mod platforms;
pub mod report;
