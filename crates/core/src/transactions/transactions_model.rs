//! Transaction header domain models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::sync::Row;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    /// Soft-deleted. Transactions are never removed.
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Currency {
    #[default]
    Pen,
    Usd,
}

/// Master variables frozen at submission time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterVariablesSnapshot {
    pub tipo_cambio: Decimal,
    pub costo_capital: Decimal,
    pub tasa_carta_fianza: Decimal,
    pub captured_at: String,
}

/// Commercial transaction header. Detail rows live in their own tables and
/// reference this row through `transaction_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transaction {
    pub id: String,
    pub unidad_negocio: String,
    pub client_name: String,
    pub company_id: Option<i64>,
    pub salesman: String,
    pub order_id: Option<i64>,
    pub tipo_cambio: Option<Decimal>,
    pub mrc_original: Option<Decimal>,
    pub mrc_currency: Currency,
    pub mrc_pen: Option<Decimal>,
    pub nrc_original: Option<Decimal>,
    pub nrc_currency: Currency,
    pub nrc_pen: Option<Decimal>,
    pub van: Option<Decimal>,
    pub tir: Option<Decimal>,
    pub payback: Option<i32>,
    pub total_revenue: Option<Decimal>,
    pub total_expense: Option<Decimal>,
    pub comisiones: Option<Decimal>,
    pub costo_instalacion: Option<Decimal>,
    pub gross_margin: Option<Decimal>,
    pub gross_margin_ratio: Option<Decimal>,
    pub plazo_contrato: Option<i32>,
    pub aplica_carta_fianza: bool,
    #[serde(deserialize_with = "embedded_json")]
    pub master_variables_snapshot: Option<MasterVariablesSnapshot>,
    #[serde(deserialize_with = "embedded_json")]
    pub financial_cache: Option<Value>,
    pub approval_status: ApprovalStatus,
    pub submission_date: Option<DateTime<Utc>>,
    pub approval_date: Option<DateTime<Utc>>,
    pub rejection_note: Option<String>,
    pub file_sha256: Option<String>,
    pub created_by: Option<String>,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Accepts either a nested JSON value or the same value stored as a string.
/// Unparseable content degrades to `None`.
fn embedded_json<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) => serde_json::from_str(&raw).ok(),
        Some(other) => serde_json::from_value(other).ok(),
    })
}

/// Approval transition applied by `update_status`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ApprovalStatus,
    pub approval_date: Option<DateTime<Utc>>,
    pub rejection_note: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: ApprovalStatus) -> Self {
        Self {
            status,
            approval_date: None,
            rejection_note: None,
        }
    }

    /// Column patch containing only the fields being changed.
    pub fn to_patch(&self) -> Row {
        let mut patch = Row::new();
        patch.insert(
            "approval_status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        if let Some(date) = self.approval_date {
            patch.insert(
                "approval_date".to_string(),
                Value::String(date.to_rfc3339()),
            );
        }
        if let Some(note) = &self.rejection_note {
            patch.insert("rejection_note".to_string(), Value::String(note.clone()));
        }
        patch
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    /// 1-based page number.
    pub page: i64,
    pub per_page: i64,
    pub salesman: Option<String>,
    /// Case-insensitive match on client, salesman, id or business unit.
    pub search: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 30,
            salesman: None,
            search: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl TransactionFilter {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1) * self.per_page.max(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPage {
    pub items: Vec<Transaction>,
    pub total: i64,
    pub pages: i64,
    pub current_page: i64,
}

impl TransactionPage {
    pub fn new(items: Vec<Transaction>, total: i64, filter: &TransactionFilter) -> Self {
        let pages = if filter.per_page > 0 {
            (total + filter.per_page - 1) / filter.per_page
        } else {
            1
        };
        Self {
            items,
            total,
            pages,
            current_page: filter.page,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingAggregates {
    pub total_pending_mrc: f64,
    pub pending_count: i64,
    pub total_pending_comisiones: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn remote_row_with_string_encoded_snapshot_parses() {
        let row = json!({
            "id": "T-9",
            "client_name": "Acme",
            "mrc_pen": 1500.5,
            "mrc_currency": "USD",
            "approval_status": "APPROVED",
            "master_variables_snapshot":
                "{\"tipo_cambio\":3.75,\"costo_capital\":0.1,\"tasa_carta_fianza\":0.02,\"captured_at\":\"2026-01-01\"}",
            "financial_cache": "not json",
            "unknown_column": true
        });
        let tx: Transaction = serde_json::from_value(row).expect("parse");
        assert_eq!(tx.mrc_pen, Some(dec!(1500.5)));
        assert_eq!(tx.mrc_currency, Currency::Usd);
        assert_eq!(tx.approval_status, ApprovalStatus::Approved);
        assert_eq!(
            tx.master_variables_snapshot.map(|s| s.tipo_cambio),
            Some(dec!(3.75))
        );
        assert_eq!(tx.financial_cache, None);
        assert_eq!(tx.salesman, "");
    }

    #[test]
    fn status_patch_only_carries_changed_fields() {
        let patch = StatusUpdate::new(ApprovalStatus::Rejected).to_patch();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch["approval_status"], json!("REJECTED"));

        let mut update = StatusUpdate::new(ApprovalStatus::Rejected);
        update.rejection_note = Some("margin too low".to_string());
        assert_eq!(update.to_patch()["rejection_note"], json!("margin too low"));
    }

    #[test]
    fn page_count_rounds_up() {
        let filter = TransactionFilter {
            per_page: 10,
            page: 2,
            ..TransactionFilter::default()
        };
        let page = TransactionPage::new(Vec::new(), 21, &filter);
        assert_eq!(page.pages, 3);
        assert_eq!(page.current_page, 2);
        assert_eq!(filter.offset(), 10);
    }
}
