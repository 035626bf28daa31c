use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use gatekeeper_core::master_variables::MasterVariable;

use crate::repository::{timestamp_from_db, timestamp_to_db};

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::master_variables)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct MasterVariableDB {
    pub id: i64,
    pub variable_name: String,
    pub variable_value: f64,
    pub category: String,
    pub user_id: String,
    pub comment: Option<String>,
    pub date_recorded: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::master_variables)]
pub struct NewMasterVariableDB {
    pub variable_name: String,
    pub variable_value: f64,
    pub category: String,
    pub user_id: String,
    pub comment: Option<String>,
    pub date_recorded: String,
}

impl From<&MasterVariable> for NewMasterVariableDB {
    fn from(variable: &MasterVariable) -> Self {
        Self {
            variable_name: variable.variable_name.clone(),
            variable_value: variable.variable_value,
            category: variable.category.clone(),
            user_id: variable.user_id.clone(),
            comment: variable.comment.clone(),
            date_recorded: timestamp_to_db(&variable.date_recorded),
        }
    }
}

impl From<MasterVariableDB> for MasterVariable {
    fn from(db: MasterVariableDB) -> Self {
        Self {
            id: Some(db.id),
            variable_name: db.variable_name,
            variable_value: db.variable_value,
            category: db.category,
            user_id: db.user_id,
            comment: db.comment,
            date_recorded: timestamp_from_db(&db.date_recorded).unwrap_or_default(),
        }
    }
}
