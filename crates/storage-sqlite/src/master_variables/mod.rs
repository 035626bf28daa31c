mod model;
mod repository;

pub use model::{MasterVariableDB, NewMasterVariableDB};
pub use repository::MasterVariableRepository;
