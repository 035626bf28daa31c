mod model;
mod repository;

pub use model::{StatusChangeset, TransactionDB};
pub use repository::TransactionRepository;
