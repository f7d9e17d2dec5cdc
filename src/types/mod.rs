//! Type mapping between SQL and Arrow data types.

mod mapping;

pub use mapping::{SqlType, TypeMapper};
