mod model;
mod repository;

pub use model::{DetailMirror, FixedCostDB, RecurringServiceDB};
pub use repository::{DetailRepository, FixedCostRepository, RecurringServiceRepository};
