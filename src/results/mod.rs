//! Solved dispatch results and their aggregation.

pub mod aggregator;
pub mod types;

pub use aggregator::*;
pub use types::*;
