//! User profiles.

mod users_model;
mod users_traits;

pub use users_model::*;
pub use users_traits::*;
