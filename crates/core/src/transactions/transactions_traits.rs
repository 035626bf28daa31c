use async_trait::async_trait;

use super::{
    ApprovalStatus, PendingAggregates, StatusUpdate, Transaction, TransactionFilter,
    TransactionPage,
};
use crate::persistence::WriteOutcome;
use crate::Result;

/// Remote-first reads, local-first writes for transaction headers.
///
/// Read methods never fail: remote errors fall back to the local mirror and
/// local errors degrade to the empty value.
#[async_trait]
pub trait TransactionRepositoryTrait: Send + Sync {
    async fn get_by_id(&self, transaction_id: &str) -> Option<Transaction>;

    async fn get_paginated(&self, filter: &TransactionFilter) -> TransactionPage;

    async fn create(&self, transaction: Transaction) -> Result<WriteOutcome<Transaction>>;

    async fn update(&self, transaction: Transaction) -> Result<WriteOutcome<Transaction>>;

    async fn update_status(
        &self,
        transaction_id: &str,
        update: StatusUpdate,
    ) -> Result<WriteOutcome<Option<Transaction>>>;

    async fn get_pending_aggregates(&self, salesman: Option<&str>) -> PendingAggregates;

    async fn get_average_margin(
        &self,
        salesman: Option<&str>,
        months_back: Option<u32>,
        status: Option<ApprovalStatus>,
    ) -> f64;

    /// Best-effort removal of a header that was created but whose details
    /// could not be written. Touches both stores.
    async fn discard_created(&self, transaction_id: &str);
}
