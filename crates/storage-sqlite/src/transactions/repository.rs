use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::dsl::{avg, count_star, sum};
use diesel::prelude::*;
use diesel::sqlite::{Sqlite, SqliteConnection};
use log::error;
use serde_json::Value;
use std::sync::Arc;

use gatekeeper_core::persistence::WriteOutcome;
use gatekeeper_core::remote::{Filter, RemoteQuery};
use gatekeeper_core::sync::{SyncPayload, SyncTable};
use gatekeeper_core::transactions::{
    ApprovalStatus, PendingAggregates, StatusUpdate, Transaction, TransactionFilter,
    TransactionPage, TransactionRepositoryTrait,
};
use gatekeeper_core::{Error, Result};

use super::model::{StatusChangeset, TransactionDB};
use crate::db::ConnectionManager;
use crate::errors::StorageError;
use crate::repository::{from_rows, json_f64, timestamp_to_db, to_row, RepositoryBase};
use crate::schema::transactions;

const SEARCH_COLUMNS: [&str; 4] = ["client_name", "salesman", "id", "unidad_negocio"];

/// Approximate month used by the margin look-back window.
const DAYS_PER_MONTH: i64 = 30;

pub struct TransactionRepository {
    base: RepositoryBase,
}

impl TransactionRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            base: RepositoryBase::new(manager, SyncTable::Transactions),
        }
    }

    fn table(&self) -> &'static str {
        SyncTable::Transactions.as_str()
    }

    fn load_local(&self, transaction_id: &str) -> Option<Transaction> {
        let id = transaction_id.to_string();
        self.base.local_read("get_by_id", move |conn| {
            let row = transactions::table
                .find(&id)
                .select(TransactionDB::as_select())
                .first::<TransactionDB>(conn)
                .optional()
                .map_err(StorageError::from)?;
            Ok(row.map(Transaction::from))
        })
    }

    async fn mirror(&self, transaction: &Transaction) {
        let row = match TransactionDB::try_from(transaction) {
            Ok(row) => row,
            Err(err) => {
                error!("Cannot mirror transaction {}: {}", transaction.id, err);
                return;
            }
        };
        self.base
            .mirror_local(&transaction.id, move |conn| upsert_local(conn, &row))
            .await;
    }

    async fn insert_remote(&self, row: Value, fallback: &Transaction) -> Result<Transaction> {
        let remote = self.base.remote()?;
        let stored = remote.insert(self.table(), vec![row]).await?;
        Ok(first_entity(stored).unwrap_or_else(|| fallback.clone()))
    }

    async fn update_remote(&self, transaction_id: &str, patch: Value) -> Result<Vec<Value>> {
        let remote = self.base.remote()?;
        let updated = remote
            .update(
                self.table(),
                &[Filter::eq("id", transaction_id)],
                patch,
            )
            .await?;
        if updated.is_empty() {
            return Err(Error::remote(format!(
                "No remote transaction {} to update",
                transaction_id
            )));
        }
        Ok(updated)
    }

    fn remote_page_query(filter: &TransactionFilter) -> RemoteQuery {
        let per_page = filter.per_page.max(1) as usize;
        let offset = filter.offset().max(0) as usize;
        let mut query = RemoteQuery::new()
            .order("submission_date", true)
            .range(offset, offset + per_page - 1)
            .with_count();
        if let Some(salesman) = filter.salesman.as_deref() {
            query = query.eq("salesman", salesman);
        }
        if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
            query = query.or_ilike(&SEARCH_COLUMNS, term.trim());
        }
        if let Some(start) = filter.start_date.as_ref() {
            query = query.gte("submission_date", timestamp_to_db(start));
        }
        if let Some(end) = filter.end_date.as_ref() {
            query = query.lte("submission_date", timestamp_to_db(end));
        }
        query
    }
}

fn upsert_local(conn: &mut SqliteConnection, row: &TransactionDB) -> Result<()> {
    diesel::insert_into(transactions::table)
        .values(row)
        .on_conflict(transactions::id)
        .do_update()
        .set(row)
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

/// First row of a remote representation, when it parses as a transaction.
fn first_entity(rows: Vec<Value>) -> Option<Transaction> {
    from_rows::<Transaction>(rows)
        .ok()
        .and_then(|items| items.into_iter().next())
}

fn filtered_local(filter: &TransactionFilter) -> transactions::BoxedQuery<'static, Sqlite> {
    let mut query = transactions::table.into_boxed();
    if let Some(salesman) = filter.salesman.clone() {
        query = query.filter(transactions::salesman.eq(salesman));
    }
    if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        // SQLite LIKE folds ASCII letters only; "Ñ" and "ñ" stay distinct offline.
        let pattern = like_pattern(term);
        query = query.filter(
            transactions::client_name
                .like(pattern.clone())
                .escape('\\')
                .or(transactions::salesman.like(pattern.clone()).escape('\\'))
                .or(transactions::id.like(pattern.clone()).escape('\\'))
                .or(transactions::unidad_negocio.like(pattern).escape('\\')),
        );
    }
    if let Some(start) = filter.start_date.as_ref() {
        query = query.filter(transactions::submission_date.ge(timestamp_to_db(start)));
    }
    if let Some(end) = filter.end_date.as_ref() {
        query = query.filter(transactions::submission_date.le(timestamp_to_db(end)));
    }
    query
}

/// Substring pattern with `%` and `_` in the term matched literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn margin_local(
    salesman: Option<String>,
    cutoff: Option<String>,
    status: Option<ApprovalStatus>,
) -> transactions::BoxedQuery<'static, Sqlite> {
    let mut query = transactions::table.into_boxed();
    if let Some(salesman) = salesman {
        query = query.filter(transactions::salesman.eq(salesman));
    }
    if let Some(cutoff) = cutoff {
        query = query.filter(transactions::submission_date.ge(cutoff));
    }
    if let Some(status) = status {
        query = query.filter(transactions::approval_status.eq(status.as_str()));
    }
    query
}

#[async_trait]
impl TransactionRepositoryTrait for TransactionRepository {
    async fn get_by_id(&self, transaction_id: &str) -> Option<Transaction> {
        let table = self.table();
        let id = transaction_id.to_string();
        let remote = self
            .base
            .remote_read("get_by_id", |remote| async move {
                let rows = remote
                    .select(table, &RemoteQuery::new().eq("id", id))
                    .await?;
                Ok(from_rows::<Transaction>(rows.rows)?.into_iter().next())
            })
            .await;
        match remote {
            Some(found) => Some(found),
            None => self.load_local(transaction_id),
        }
    }

    async fn get_paginated(&self, filter: &TransactionFilter) -> TransactionPage {
        let table = self.table();
        let query = Self::remote_page_query(filter);
        let remote = self
            .base
            .remote_read("get_paginated", |remote| async move {
                let result = remote.select(table, &query).await?;
                let items = from_rows::<Transaction>(result.rows)?;
                let total = result.count.unwrap_or(items.len()) as i64;
                Ok(Some((items, total)))
            })
            .await;
        if let Some((items, total)) = remote {
            return TransactionPage::new(items, total, filter);
        }

        let (items, total) = self.base.local_read("get_paginated", |conn| {
            let total = filtered_local(filter)
                .select(count_star())
                .first::<i64>(conn)
                .map_err(StorageError::from)?;
            let rows = filtered_local(filter)
                .order((
                    transactions::submission_date.is_null().asc(),
                    transactions::submission_date.desc(),
                    transactions::id.desc(),
                ))
                .limit(filter.per_page.max(1))
                .offset(filter.offset().max(0))
                .select(TransactionDB::as_select())
                .load::<TransactionDB>(conn)
                .map_err(StorageError::from)?;
            Ok((rows.into_iter().map(Transaction::from).collect(), total))
        });
        TransactionPage::new(items, total, filter)
    }

    async fn create(&self, transaction: Transaction) -> Result<WriteOutcome<Transaction>> {
        let row = to_row(&transaction)?;
        match self
            .insert_remote(Value::Object(row.clone()), &transaction)
            .await
        {
            Ok(confirmed) => {
                self.mirror(&confirmed).await;
                Ok(WriteOutcome::Remote(confirmed))
            }
            Err(err) => {
                self.base
                    .log_remote_write_failure("insert", &transaction.id, &err);
                self.mirror(&transaction).await;
                self.base
                    .enqueue_pending(SyncPayload::Insert(row), &transaction.id)
                    .await;
                Ok(WriteOutcome::Queued(transaction))
            }
        }
    }

    async fn update(&self, transaction: Transaction) -> Result<WriteOutcome<Transaction>> {
        let row = to_row(&transaction)?;
        match self
            .update_remote(&transaction.id, Value::Object(row.clone()))
            .await
        {
            Ok(updated) => {
                let confirmed = first_entity(updated).unwrap_or_else(|| transaction.clone());
                self.mirror(&confirmed).await;
                Ok(WriteOutcome::Remote(confirmed))
            }
            Err(err) => {
                self.base
                    .log_remote_write_failure("update", &transaction.id, &err);
                self.mirror(&transaction).await;
                self.base
                    .enqueue_pending(SyncPayload::Update(row), &transaction.id)
                    .await;
                Ok(WriteOutcome::Queued(transaction))
            }
        }
    }

    async fn update_status(
        &self,
        transaction_id: &str,
        update: StatusUpdate,
    ) -> Result<WriteOutcome<Option<Transaction>>> {
        let patch = update.to_patch();
        let changeset = StatusChangeset::from(&update);
        let id = transaction_id.to_string();

        let remote = self
            .update_remote(transaction_id, Value::Object(patch.clone()))
            .await;
        if let Err(err) = &remote {
            self.base
                .log_remote_write_failure("update_status", transaction_id, err);
        }

        self.base
            .mirror_local(transaction_id, move |conn| {
                diesel::update(transactions::table.find(&id))
                    .set(&changeset)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await;

        match remote {
            Ok(updated) => {
                let confirmed = first_entity(updated).or_else(|| self.load_local(transaction_id));
                Ok(WriteOutcome::Remote(confirmed))
            }
            Err(_) => {
                self.base
                    .enqueue_pending(SyncPayload::UpdateStatus(patch), transaction_id)
                    .await;
                Ok(WriteOutcome::Queued(self.load_local(transaction_id)))
            }
        }
    }

    async fn get_pending_aggregates(&self, salesman: Option<&str>) -> PendingAggregates {
        let table = self.table();
        let mut query = RemoteQuery::new()
            .select("mrc_pen,comisiones")
            .eq("approval_status", ApprovalStatus::Pending.as_str());
        if let Some(salesman) = salesman {
            query = query.eq("salesman", salesman);
        }
        let remote = self
            .base
            .remote_read("get_pending_aggregates", |remote| async move {
                let result = remote.select(table, &query).await?;
                let mut totals = PendingAggregates::default();
                for row in &result.rows {
                    totals.total_pending_mrc += json_f64(row.get("mrc_pen")).unwrap_or(0.0);
                    totals.total_pending_comisiones +=
                        json_f64(row.get("comisiones")).unwrap_or(0.0);
                    totals.pending_count += 1;
                }
                Ok(Some(totals))
            })
            .await;
        if let Some(totals) = remote {
            return totals;
        }

        let salesman = salesman.map(str::to_string);
        self.base.local_read("get_pending_aggregates", move |conn| {
            let mut query = transactions::table
                .filter(transactions::approval_status.eq(ApprovalStatus::Pending.as_str()))
                .into_boxed();
            if let Some(salesman) = salesman {
                query = query.filter(transactions::salesman.eq(salesman));
            }
            let (mrc, count, comisiones) = query
                .select((
                    sum(transactions::mrc_pen),
                    count_star(),
                    sum(transactions::comisiones),
                ))
                .first::<(Option<f64>, i64, Option<f64>)>(conn)
                .map_err(StorageError::from)?;
            Ok(PendingAggregates {
                total_pending_mrc: mrc.unwrap_or(0.0),
                pending_count: count,
                total_pending_comisiones: comisiones.unwrap_or(0.0),
            })
        })
    }

    async fn get_average_margin(
        &self,
        salesman: Option<&str>,
        months_back: Option<u32>,
        status: Option<ApprovalStatus>,
    ) -> f64 {
        let cutoff = months_back
            .map(|months| Utc::now() - Duration::days(i64::from(months) * DAYS_PER_MONTH))
            .map(|cutoff| timestamp_to_db(&cutoff));

        let table = self.table();
        let mut query = RemoteQuery::new().select("gross_margin_ratio");
        if let Some(salesman) = salesman {
            query = query.eq("salesman", salesman);
        }
        if let Some(cutoff) = cutoff.clone() {
            query = query.gte("submission_date", cutoff);
        }
        if let Some(status) = status {
            query = query.eq("approval_status", status.as_str());
        }
        let remote = self
            .base
            .remote_read("get_average_margin", |remote| async move {
                let result = remote.select(table, &query).await?;
                let ratios: Vec<f64> = result
                    .rows
                    .iter()
                    .filter_map(|row| json_f64(row.get("gross_margin_ratio")))
                    .collect();
                if ratios.is_empty() {
                    return Ok(Some(0.0));
                }
                Ok(Some(ratios.iter().sum::<f64>() / ratios.len() as f64))
            })
            .await;
        if let Some(average) = remote {
            return average;
        }

        let salesman = salesman.map(str::to_string);
        self.base.local_read("get_average_margin", move |conn| {
            let average = margin_local(salesman, cutoff, status)
                .select(avg(transactions::gross_margin_ratio))
                .first::<Option<f64>>(conn)
                .map_err(StorageError::from)?;
            Ok(average.unwrap_or(0.0))
        })
    }

    async fn discard_created(&self, transaction_id: &str) {
        match self.base.remote() {
            Ok(remote) => {
                if let Err(err) = remote
                    .delete(self.table(), &[Filter::eq("id", transaction_id)])
                    .await
                {
                    self.base
                        .log_remote_write_failure("delete", transaction_id, &err);
                }
            }
            Err(err) => self
                .base
                .log_remote_write_failure("delete", transaction_id, &err),
        }

        let id = transaction_id.to_string();
        self.base
            .mirror_local(transaction_id, move |conn| {
                diesel::delete(transactions::table.find(&id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init;
    use crate::schema_init::initialize_schema;
    use crate::sync::SyncQueueRepository;
    use chrono::TimeZone;
    use gatekeeper_core::remote::RemoteStore;
    use gatekeeper_core::sync::SyncStatus;
    use gatekeeper_remote::{MemoryRemoteStore, RemoteVerb};
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    fn manager(remote: Option<Arc<MemoryRemoteStore>>) -> Arc<ConnectionManager> {
        let app_data = tempdir()
            .expect("tempdir")
            .keep()
            .to_string_lossy()
            .to_string();
        let db_path = init(&app_data).expect("init db");
        initialize_schema(&db_path).expect("schema");
        let remote = remote.map(|r| r as Arc<dyn RemoteStore>);
        Arc::new(ConnectionManager::with_remote(&db_path, remote).expect("manager"))
    }

    fn transaction(id: &str, salesman: &str, day: u32) -> Transaction {
        let mut tx = Transaction::new(id);
        tx.salesman = salesman.to_string();
        tx.client_name = format!("Client {}", id);
        tx.unidad_negocio = "GIGALAN".to_string();
        tx.mrc_pen = Some(dec!(100));
        tx.comisiones = Some(dec!(10));
        tx.gross_margin_ratio = Some(dec!(0.4));
        tx.submission_date = Some(Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap());
        tx
    }

    #[tokio::test]
    async fn offline_create_is_mirrored_and_queued() {
        let manager = manager(None);
        let repo = TransactionRepository::new(Arc::clone(&manager));
        let tx = transaction("T-1", "ana", 2);

        let outcome = repo.create(tx.clone()).await.expect("create");
        assert_eq!(outcome, WriteOutcome::Queued(tx.clone()));
        assert_eq!(repo.get_by_id("T-1").await, Some(tx));

        let queue = SyncQueueRepository::new(manager);
        let rows = queue.list_by_status(SyncStatus::Pending).expect("queue");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].table_name, "transactions");
        assert_eq!(rows[0].operation, "insert");
        assert_eq!(rows[0].entity_id, "T-1");
    }

    #[tokio::test]
    async fn online_create_goes_remote_without_queueing() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = TransactionRepository::new(Arc::clone(&manager));

        let outcome = repo
            .create(transaction("T-5", "ana", 3))
            .await
            .expect("create");
        assert!(!outcome.is_queued());
        assert_eq!(remote.rows("transactions").len(), 1);
        assert_eq!(manager.get_pending_sync_count(), 0);

        remote.set_offline(true);
        assert_eq!(
            repo.get_by_id("T-5").await.map(|t| t.client_name),
            Some("Client T-5".to_string())
        );
    }

    #[tokio::test]
    async fn update_of_missing_remote_row_is_queued() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = TransactionRepository::new(Arc::clone(&manager));

        let outcome = repo
            .update(transaction("T-7", "ana", 4))
            .await
            .expect("update");
        assert!(outcome.is_queued());
        assert_eq!(manager.get_pending_sync_count(), 1);
    }

    #[tokio::test]
    async fn status_update_falls_back_to_a_local_patch() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = TransactionRepository::new(Arc::clone(&manager));
        repo.create(transaction("T-3", "ana", 5)).await.expect("create");

        remote.fail_next("transactions", RemoteVerb::Update, 1);
        let mut update = StatusUpdate::new(ApprovalStatus::Rejected);
        update.rejection_note = Some("margin".to_string());
        let outcome = repo.update_status("T-3", update).await.expect("status");

        assert!(outcome.is_queued());
        let local = outcome.into_inner().expect("local row");
        assert_eq!(local.approval_status, ApprovalStatus::Rejected);
        assert_eq!(local.rejection_note.as_deref(), Some("margin"));
        assert_eq!(local.client_name, "Client T-3");

        let queue = SyncQueueRepository::new(manager);
        let rows = queue.list_replayable(10).expect("queue");
        assert_eq!(rows[0].operation, "update_status");
        let payload = SyncPayload::decode(&rows[0].operation, &rows[0].payload).expect("decode");
        match payload {
            SyncPayload::UpdateStatus(patch) => {
                assert_eq!(patch.len(), 2);
                assert_eq!(patch["approval_status"], "REJECTED");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn local_pagination_filters_and_orders() {
        let manager = manager(None);
        let repo = TransactionRepository::new(manager);
        for (id, salesman, day) in [("T-1", "ana", 1), ("T-2", "ana", 3), ("T-3", "luis", 2)] {
            repo.create(transaction(id, salesman, day)).await.expect("create");
        }

        let page = repo
            .get_paginated(&TransactionFilter {
                per_page: 1,
                page: 2,
                salesman: Some("ana".to_string()),
                ..TransactionFilter::default()
            })
            .await;
        assert_eq!(page.total, 2);
        assert_eq!(page.pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "T-1");

        let page = repo
            .get_paginated(&TransactionFilter {
                search: Some("client t-3".to_string()),
                ..TransactionFilter::default()
            })
            .await;
        assert_eq!(page.items.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["T-3"]);
    }

    #[tokio::test]
    async fn local_search_matches_wildcards_literally() {
        let manager = manager(None);
        let repo = TransactionRepository::new(manager);
        let mut promo = transaction("T-1", "ana", 1);
        promo.client_name = "Promo 50% SAC".to_string();
        let mut plain = transaction("T-2", "ana", 2);
        plain.client_name = "Canal 500 SAC".to_string();
        let mut underscored = transaction("T-3", "ana", 3);
        underscored.client_name = "red_norte".to_string();
        for tx in [promo, plain, underscored] {
            repo.create(tx).await.expect("create");
        }

        let ids = |page: TransactionPage| -> Vec<String> {
            page.items.into_iter().map(|t| t.id).collect()
        };
        let percent = repo
            .get_paginated(&TransactionFilter {
                search: Some("50%".to_string()),
                ..TransactionFilter::default()
            })
            .await;
        assert_eq!(ids(percent), vec!["T-1"]);

        let underscore = repo
            .get_paginated(&TransactionFilter {
                search: Some("d_n".to_string()),
                ..TransactionFilter::default()
            })
            .await;
        assert_eq!(ids(underscore), vec!["T-3"]);

        let nothing = repo
            .get_paginated(&TransactionFilter {
                search: Some("l_5".to_string()),
                ..TransactionFilter::default()
            })
            .await;
        assert!(nothing.items.is_empty());
    }

    #[tokio::test]
    async fn undated_rows_sort_last_on_both_stores() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let repo = TransactionRepository::new(manager(Some(Arc::clone(&remote))));
        let mut undated = transaction("T-0", "ana", 1);
        undated.submission_date = None;
        for tx in [undated, transaction("T-1", "ana", 1), transaction("T-2", "ana", 5)] {
            repo.create(tx).await.expect("create");
        }

        let online: Vec<String> = repo
            .get_paginated(&TransactionFilter::default())
            .await
            .items
            .into_iter()
            .map(|t| t.id)
            .collect();
        remote.set_offline(true);
        let offline: Vec<String> = repo
            .get_paginated(&TransactionFilter::default())
            .await
            .items
            .into_iter()
            .map(|t| t.id)
            .collect();

        assert_eq!(online, vec!["T-2", "T-1", "T-0"]);
        assert_eq!(offline, online);
    }

    #[tokio::test]
    async fn aggregates_agree_between_remote_and_local() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = TransactionRepository::new(manager);
        repo.create(transaction("T-1", "ana", 1)).await.expect("create");
        repo.create(transaction("T-2", "ana", 2)).await.expect("create");
        let mut approved = transaction("T-3", "ana", 3);
        approved.approval_status = ApprovalStatus::Approved;
        approved.gross_margin_ratio = Some(dec!(0.1));
        repo.create(approved).await.expect("create");

        let from_remote = repo.get_pending_aggregates(Some("ana")).await;
        let margin_remote = repo.get_average_margin(Some("ana"), None, None).await;
        remote.set_offline(true);
        let from_local = repo.get_pending_aggregates(Some("ana")).await;
        let margin_local = repo.get_average_margin(Some("ana"), None, None).await;

        assert_eq!(from_remote, from_local);
        assert_eq!(from_local.pending_count, 2);
        assert!((from_local.total_pending_mrc - 200.0).abs() < 1e-9);
        assert!((margin_remote - margin_local).abs() < 1e-9);
        assert!((margin_local - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn discard_removes_both_copies() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Some(Arc::clone(&remote)));
        let repo = TransactionRepository::new(manager);
        repo.create(transaction("T-4", "ana", 1)).await.expect("create");

        repo.discard_created("T-4").await;
        assert!(remote.rows("transactions").is_empty());
        assert_eq!(repo.get_by_id("T-4").await, None);
    }
}
