//! # duc-io: on-disk formats
//!
//! Readers and writers for the three-file CSV instance layout
//! (`buses.csv`, `lines.csv`, `generators.csv`) and the one-row-per-variant
//! solution CSV.

pub mod instance;
pub mod solution;

pub use instance::{read_instance, write_instance};
pub use solution::{read_solutions, write_solutions, SolutionRecord};
