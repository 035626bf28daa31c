//! Transaction detail rows (one-time costs and recurring services).

use serde::{Deserialize, Serialize};

use crate::transactions::Currency;

/// One-time cost line of a transaction.
///
/// `id` is assigned by whichever store holds the row and is never sent on
/// insert; the local mirror keeps its own sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedCost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub transaction_id: Option<String>,
    pub categoria: Option<String>,
    pub tipo_servicio: Option<String>,
    pub ticket: Option<String>,
    pub ubicacion: Option<String>,
    pub cantidad: Option<f64>,
    pub costo_unitario_original: Option<f64>,
    pub costo_unitario_currency: Currency,
    pub costo_unitario_pen: Option<f64>,
    pub periodo_inicio: i32,
    pub duracion_meses: i32,
}

impl Default for FixedCost {
    fn default() -> Self {
        Self {
            id: None,
            transaction_id: None,
            categoria: None,
            tipo_servicio: None,
            ticket: None,
            ubicacion: None,
            cantidad: None,
            costo_unitario_original: None,
            costo_unitario_currency: Currency::Usd,
            costo_unitario_pen: None,
            periodo_inicio: 0,
            duracion_meses: 1,
        }
    }
}

/// Monthly recurring service line of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurringService {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub transaction_id: Option<String>,
    pub tipo_servicio: Option<String>,
    pub nota: Option<String>,
    pub ubicacion: Option<String>,
    pub quantity: Option<f64>,
    pub price_original: Option<f64>,
    pub price_currency: Currency,
    pub price_pen: Option<f64>,
    pub cost_unit_1_original: Option<f64>,
    pub cost_unit_2_original: Option<f64>,
    pub cost_unit_currency: Currency,
    pub cost_unit_1_pen: Option<f64>,
    pub cost_unit_2_pen: Option<f64>,
    pub proveedor: Option<String>,
}

impl Default for RecurringService {
    fn default() -> Self {
        Self {
            id: None,
            transaction_id: None,
            tipo_servicio: None,
            nota: None,
            ubicacion: None,
            quantity: None,
            price_original: None,
            price_currency: Currency::Pen,
            price_pen: None,
            cost_unit_1_original: None,
            cost_unit_2_original: None,
            cost_unit_currency: Currency::Usd,
            cost_unit_1_pen: None,
            cost_unit_2_pen: None,
            proveedor: None,
        }
    }
}

/// Common surface of the two detail collections.
pub trait DetailRow: Clone + Send + Sync + 'static {
    fn id(&self) -> Option<i64>;

    /// Same row bound to `transaction_id` with its store id removed, ready to insert.
    fn for_insert(&self, transaction_id: &str) -> Self;
}

impl DetailRow for FixedCost {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn for_insert(&self, transaction_id: &str) -> Self {
        Self {
            id: None,
            transaction_id: Some(transaction_id.to_string()),
            ..self.clone()
        }
    }
}

impl DetailRow for RecurringService {
    fn id(&self) -> Option<i64> {
        self.id
    }

    fn for_insert(&self, transaction_id: &str) -> Self {
        Self {
            id: None,
            transaction_id: Some(transaction_id.to_string()),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_shape_omits_id_and_binds_parent() {
        let cost = FixedCost {
            id: Some(41),
            categoria: Some("Equipos".to_string()),
            cantidad: Some(2.0),
            ..FixedCost::default()
        };
        let value = serde_json::to_value(cost.for_insert("T-3")).expect("json");
        assert!(value.get("id").is_none());
        assert_eq!(value["transaction_id"], json!("T-3"));
        assert_eq!(value["costo_unitario_currency"], json!("USD"));
        assert_eq!(value["duracion_meses"], json!(1));
    }

    #[test]
    fn remote_row_with_server_id_parses() {
        let row = json!({"id": 7, "transaction_id": "T-3", "price_pen": 99.5});
        let service: RecurringService = serde_json::from_value(row).expect("parse");
        assert_eq!(service.id(), Some(7));
        assert_eq!(service.price_currency, Currency::Pen);
        assert_eq!(service.price_pen, Some(99.5));
    }
}
