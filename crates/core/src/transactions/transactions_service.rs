use chrono::Local;
use log::{error, info, warn};
use std::sync::Arc;

use super::{Transaction, TransactionRepositoryTrait};
use crate::details::{DetailRepositoryTrait, FixedCost, RecurringService};
use crate::persistence::{LocalBatch, WriteOutcome};
use crate::{Error, Result};

/// Generates a transaction id of the form `FLX{YY}-{MMDDHHMMSSffffff}`.
pub fn generate_transaction_id() -> String {
    let now = Local::now();
    format!("FLX{}-{}", now.format("%y"), now.format("%m%d%H%M%S%6f"))
}

/// A header together with its two detail collections.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionWithDetails {
    pub transaction: Transaction,
    pub fixed_costs: Vec<FixedCost>,
    pub recurring_services: Vec<RecurringService>,
    /// True when any part is only persisted locally and waiting in the sync queue.
    pub queued: bool,
}

/// Coordinates header and detail writes so that no header exists remotely
/// without its detail rows.
pub struct TransactionService {
    transactions: Arc<dyn TransactionRepositoryTrait>,
    fixed_costs: Arc<dyn DetailRepositoryTrait<FixedCost>>,
    recurring_services: Arc<dyn DetailRepositoryTrait<RecurringService>>,
    batch: Arc<dyn LocalBatch>,
}

impl TransactionService {
    pub fn new(
        transactions: Arc<dyn TransactionRepositoryTrait>,
        fixed_costs: Arc<dyn DetailRepositoryTrait<FixedCost>>,
        recurring_services: Arc<dyn DetailRepositoryTrait<RecurringService>>,
        batch: Arc<dyn LocalBatch>,
    ) -> Self {
        Self {
            transactions,
            fixed_costs,
            recurring_services,
            batch,
        }
    }

    /// Persists a header and its details.
    ///
    /// If the header reached the remote store but a detail insert is rejected,
    /// the header and any partial details are removed from both stores and
    /// the detail error is returned. If the header itself was queued, the
    /// details are queued behind it without a remote attempt.
    pub async fn create_with_details(
        &self,
        mut transaction: Transaction,
        fixed_costs: Vec<FixedCost>,
        recurring_services: Vec<RecurringService>,
    ) -> Result<TransactionWithDetails> {
        if transaction.id.is_empty() {
            transaction.id = generate_transaction_id();
        }

        let header = match self.transactions.create(transaction).await? {
            WriteOutcome::Queued(header) => {
                let fixed = self.fixed_costs.queue_batch(&header.id, fixed_costs).await;
                let recurring = self
                    .recurring_services
                    .queue_batch(&header.id, recurring_services)
                    .await;
                return Ok(TransactionWithDetails {
                    transaction: header,
                    fixed_costs: fixed.into_inner(),
                    recurring_services: recurring.into_inner(),
                    queued: true,
                });
            }
            WriteOutcome::Remote(header) => header,
        };

        let details = self
            .create_remote_details(&header.id, fixed_costs, recurring_services)
            .await;
        match details {
            Ok((fixed, recurring)) => {
                info!("Transaction {} created with details", header.id);
                let queued = fixed.is_queued() || recurring.is_queued();
                Ok(TransactionWithDetails {
                    transaction: header,
                    fixed_costs: fixed.into_inner(),
                    recurring_services: recurring.into_inner(),
                    queued,
                })
            }
            Err(err) => {
                error!(
                    "Detail creation failed for transaction {}; rolling back header: {}",
                    header.id, err
                );
                self.transactions.discard_created(&header.id).await;
                self.fixed_costs.discard_for_transaction(&header.id).await;
                self.recurring_services
                    .discard_for_transaction(&header.id)
                    .await;
                Err(err)
            }
        }
    }

    async fn create_remote_details(
        &self,
        transaction_id: &str,
        fixed_costs: Vec<FixedCost>,
        recurring_services: Vec<RecurringService>,
    ) -> Result<(
        WriteOutcome<Vec<FixedCost>>,
        WriteOutcome<Vec<RecurringService>>,
    )> {
        let fixed = self
            .fixed_costs
            .create_batch(transaction_id, fixed_costs)
            .await?;
        let recurring = self
            .recurring_services
            .create_batch(transaction_id, recurring_services)
            .await?;
        Ok((fixed, recurring))
    }

    /// Replaces both detail collections; their local writes share one commit.
    pub async fn replace_details(
        &self,
        transaction_id: &str,
        fixed_costs: Vec<FixedCost>,
        recurring_services: Vec<RecurringService>,
    ) -> Result<(Vec<FixedCost>, Vec<RecurringService>)> {
        let mut fixed = None;
        let mut recurring = None;
        {
            let fixed_slot = &mut fixed;
            let recurring_slot = &mut recurring;
            let fixed_repo = &self.fixed_costs;
            let recurring_repo = &self.recurring_services;
            self.batch
                .run_batch(Box::pin(async move {
                    *fixed_slot = Some(
                        fixed_repo
                            .replace_for_transaction(transaction_id, fixed_costs)
                            .await,
                    );
                    *recurring_slot = Some(
                        recurring_repo
                            .replace_for_transaction(transaction_id, recurring_services)
                            .await,
                    );
                    Ok::<(), Error>(())
                }))
                .await?;
        }
        let (Some(fixed), Some(recurring)) = (fixed, recurring) else {
            return Err(Error::Sync(format!(
                "Detail replace for {} did not run",
                transaction_id
            )));
        };

        if fixed.is_queued() || recurring.is_queued() {
            warn!(
                "Details of transaction {} saved locally; remote replace is queued",
                transaction_id
            );
        }
        Ok((fixed.into_inner(), recurring.into_inner()))
    }

    /// Header plus details, each read remote-first.
    pub async fn get_with_details(&self, transaction_id: &str) -> Option<TransactionWithDetails> {
        let transaction = self.transactions.get_by_id(transaction_id).await?;
        let fixed_costs = self.fixed_costs.get_by_transaction(transaction_id).await;
        let recurring_services = self
            .recurring_services
            .get_by_transaction(transaction_id)
            .await;
        Some(TransactionWithDetails {
            transaction,
            fixed_costs,
            recurring_services,
            queued: false,
        })
    }
}
