//! Harbor CLI Library
//!
//! Command implementations and output rendering, exposed for testing.

pub mod builtin;
pub mod commands;
pub mod output;

pub use output::OutputFormat;
