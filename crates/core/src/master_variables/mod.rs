//! Versioned system variables (exchange rate, cost of capital, bond rate).

mod master_variables_model;
mod master_variables_traits;

pub use master_variables_model::*;
pub use master_variables_traits::*;
