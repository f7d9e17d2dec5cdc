//! Arrow data format conversion utilities.
//!
//! This module converts row-major JSON result data into Apache Arrow
//! columnar batches. The in-process transport uses it to serve canned
//! results described as JSON.

mod builders;
mod converter;

pub use builders::build_array;
pub use converter::{json_to_batches, ArrowConverter};
