//! Database model for the `transactions` mirror table.

use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};

use gatekeeper_core::transactions::{MasterVariablesSnapshot, StatusUpdate, Transaction};
use gatekeeper_core::{Error, Result};

use crate::repository::{
    decimal_from_db, decimal_to_db, enum_from_db, enum_to_db, timestamp_from_db, timestamp_to_db,
};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct TransactionDB {
    pub id: String,
    pub unidad_negocio: String,
    pub client_name: String,
    pub company_id: Option<i64>,
    pub salesman: String,
    pub order_id: Option<i64>,
    pub tipo_cambio: Option<f64>,
    pub mrc_original: Option<f64>,
    pub mrc_currency: String,
    pub mrc_pen: Option<f64>,
    pub nrc_original: Option<f64>,
    pub nrc_currency: String,
    pub nrc_pen: Option<f64>,
    pub van: Option<f64>,
    pub tir: Option<f64>,
    pub payback: Option<i32>,
    pub total_revenue: Option<f64>,
    pub total_expense: Option<f64>,
    pub comisiones: Option<f64>,
    pub costo_instalacion: Option<f64>,
    pub gross_margin: Option<f64>,
    pub gross_margin_ratio: Option<f64>,
    pub plazo_contrato: Option<i32>,
    pub aplica_carta_fianza: bool,
    pub master_variables_snapshot: Option<String>,
    pub financial_cache: Option<String>,
    pub approval_status: String,
    pub submission_date: Option<String>,
    pub approval_date: Option<String>,
    pub rejection_note: Option<String>,
    pub file_sha256: Option<String>,
    pub created_by: Option<String>,
}

impl TryFrom<&Transaction> for TransactionDB {
    type Error = Error;

    fn try_from(tx: &Transaction) -> Result<Self> {
        let snapshot = tx
            .master_variables_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let cache = tx
            .financial_cache
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(Self {
            id: tx.id.clone(),
            unidad_negocio: tx.unidad_negocio.clone(),
            client_name: tx.client_name.clone(),
            company_id: tx.company_id,
            salesman: tx.salesman.clone(),
            order_id: tx.order_id,
            tipo_cambio: decimal_to_db(tx.tipo_cambio),
            mrc_original: decimal_to_db(tx.mrc_original),
            mrc_currency: enum_to_db(&tx.mrc_currency)?,
            mrc_pen: decimal_to_db(tx.mrc_pen),
            nrc_original: decimal_to_db(tx.nrc_original),
            nrc_currency: enum_to_db(&tx.nrc_currency)?,
            nrc_pen: decimal_to_db(tx.nrc_pen),
            van: decimal_to_db(tx.van),
            tir: decimal_to_db(tx.tir),
            payback: tx.payback,
            total_revenue: decimal_to_db(tx.total_revenue),
            total_expense: decimal_to_db(tx.total_expense),
            comisiones: decimal_to_db(tx.comisiones),
            costo_instalacion: decimal_to_db(tx.costo_instalacion),
            gross_margin: decimal_to_db(tx.gross_margin),
            gross_margin_ratio: decimal_to_db(tx.gross_margin_ratio),
            plazo_contrato: tx.plazo_contrato,
            aplica_carta_fianza: tx.aplica_carta_fianza,
            master_variables_snapshot: snapshot,
            financial_cache: cache,
            approval_status: tx.approval_status.as_str().to_string(),
            submission_date: tx.submission_date.as_ref().map(timestamp_to_db),
            approval_date: tx.approval_date.as_ref().map(timestamp_to_db),
            rejection_note: tx.rejection_note.clone(),
            file_sha256: tx.file_sha256.clone(),
            created_by: tx.created_by.clone(),
        })
    }
}

impl From<TransactionDB> for Transaction {
    fn from(db: TransactionDB) -> Self {
        let snapshot = db
            .master_variables_snapshot
            .as_deref()
            .and_then(|raw| serde_json::from_str::<MasterVariablesSnapshot>(raw).ok());
        let cache = db
            .financial_cache
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());
        let approval_status = enum_from_db(&db.approval_status).unwrap_or_else(|_| {
            warn!(
                "Transaction {} has unknown status '{}'",
                db.id, db.approval_status
            );
            Default::default()
        });

        Self {
            mrc_currency: enum_from_db(&db.mrc_currency).unwrap_or_default(),
            nrc_currency: enum_from_db(&db.nrc_currency).unwrap_or_default(),
            tipo_cambio: decimal_from_db(db.tipo_cambio),
            mrc_original: decimal_from_db(db.mrc_original),
            mrc_pen: decimal_from_db(db.mrc_pen),
            nrc_original: decimal_from_db(db.nrc_original),
            nrc_pen: decimal_from_db(db.nrc_pen),
            van: decimal_from_db(db.van),
            tir: decimal_from_db(db.tir),
            total_revenue: decimal_from_db(db.total_revenue),
            total_expense: decimal_from_db(db.total_expense),
            comisiones: decimal_from_db(db.comisiones),
            costo_instalacion: decimal_from_db(db.costo_instalacion),
            gross_margin: decimal_from_db(db.gross_margin),
            gross_margin_ratio: decimal_from_db(db.gross_margin_ratio),
            submission_date: db.submission_date.as_deref().and_then(timestamp_from_db),
            approval_date: db.approval_date.as_deref().and_then(timestamp_from_db),
            master_variables_snapshot: snapshot,
            financial_cache: cache,
            approval_status,
            id: db.id,
            unidad_negocio: db.unidad_negocio,
            client_name: db.client_name,
            company_id: db.company_id,
            salesman: db.salesman,
            order_id: db.order_id,
            payback: db.payback,
            plazo_contrato: db.plazo_contrato,
            aplica_carta_fianza: db.aplica_carta_fianza,
            rejection_note: db.rejection_note,
            file_sha256: db.file_sha256,
            created_by: db.created_by,
        }
    }
}

/// Status-only local patch. `None` fields are left untouched.
#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = crate::schema::transactions)]
pub struct StatusChangeset {
    pub approval_status: String,
    pub approval_date: Option<String>,
    pub rejection_note: Option<String>,
}

impl From<&StatusUpdate> for StatusChangeset {
    fn from(update: &StatusUpdate) -> Self {
        Self {
            approval_status: update.status.as_str().to_string(),
            approval_date: update.approval_date.as_ref().map(timestamp_to_db),
            rejection_note: update.rejection_note.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gatekeeper_core::transactions::{ApprovalStatus, Currency};
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn mirror_row_keeps_the_entity() {
        let mut tx = Transaction::new("FLX26-0105");
        tx.client_name = "Acme".to_string();
        tx.mrc_currency = Currency::Usd;
        tx.mrc_pen = Some(dec!(3750.5));
        tx.approval_status = ApprovalStatus::Approved;
        tx.submission_date = Some(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap());
        tx.financial_cache = Some(json!({"van": 12.5}));
        tx.master_variables_snapshot = Some(MasterVariablesSnapshot {
            tipo_cambio: dec!(3.75),
            captured_at: "2026-01-05".to_string(),
            ..MasterVariablesSnapshot::default()
        });

        let db = TransactionDB::try_from(&tx).expect("to db");
        assert_eq!(db.mrc_currency, "USD");
        assert_eq!(db.approval_status, "APPROVED");
        assert_eq!(db.submission_date.as_deref(), Some("2026-01-05T10:00:00.000000Z"));

        assert_eq!(Transaction::from(db), tx);
    }

    #[test]
    fn unreadable_columns_degrade_to_defaults() {
        let mut db = TransactionDB::try_from(&Transaction::new("T-1")).expect("to db");
        db.approval_status = "ARCHIVED".to_string();
        db.master_variables_snapshot = Some("{".to_string());
        let tx = Transaction::from(db);
        assert_eq!(tx.approval_status, ApprovalStatus::Pending);
        assert_eq!(tx.master_variables_snapshot, None);
    }
}
