#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ReportError`)
//! - [`parser`]: Report parsers (`ReportParser` trait, `TrivyParser`, `NativeParser`)
//! - [`fixed`]: Fixed-version selection for comma-separated candidate lists

pub mod error;
pub mod fixed;
pub mod parser;

// --- Public API Re-exports ---

pub use error::ReportError;
pub use fixed::{is_plausible_version, select_fixed_version};
pub use parser::{
    parser_for, NativeParser, ParseOptions, ReportParser, TrivyParser, UnparseablePolicy,
};
