use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const VARIABLE_TIPO_CAMBIO: &str = "tipoCambio";
pub const VARIABLE_COSTO_CAPITAL: &str = "costoCapital";
pub const VARIABLE_TASA_CARTA_FIANZA: &str = "tasaCartaFianza";

/// One recorded value of a master variable. The table is append-only: the
/// current value of a name is its most recent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterVariable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub variable_name: String,
    pub variable_value: f64,
    pub category: String,
    pub user_id: String,
    #[serde(default)]
    pub comment: Option<String>,
    pub date_recorded: DateTime<Utc>,
}

impl MasterVariable {
    pub fn new(
        variable_name: impl Into<String>,
        variable_value: f64,
        category: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            variable_name: variable_name.into(),
            variable_value,
            category: category.into(),
            user_id: user_id.into(),
            comment: None,
            date_recorded: Utc::now(),
        }
    }
}
