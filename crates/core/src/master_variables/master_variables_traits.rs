use async_trait::async_trait;
use std::collections::HashMap;

use super::MasterVariable;
use crate::persistence::WriteOutcome;
use crate::Result;

#[async_trait]
pub trait MasterVariableRepositoryTrait: Send + Sync {
    /// Records newest first, optionally limited to one category.
    async fn get_all(&self, category: Option<&str>) -> Vec<MasterVariable>;

    /// Most recent value of each requested name; `None` for names never recorded.
    async fn get_latest(&self, names: &[&str]) -> HashMap<String, Option<f64>>;

    /// Appends a new record.
    async fn create(&self, variable: MasterVariable) -> Result<WriteOutcome<MasterVariable>>;
}
