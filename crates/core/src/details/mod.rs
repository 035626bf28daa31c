//! Detail collections attached to a transaction header.

mod details_model;
mod details_traits;

pub use details_model::*;
pub use details_traits::*;
