use async_trait::async_trait;
use diesel::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use gatekeeper_core::master_variables::{MasterVariable, MasterVariableRepositoryTrait};
use gatekeeper_core::persistence::WriteOutcome;
use gatekeeper_core::remote::RemoteQuery;
use gatekeeper_core::sync::{SyncPayload, SyncTable};
use gatekeeper_core::Result;

use super::model::{MasterVariableDB, NewMasterVariableDB};
use crate::db::ConnectionManager;
use crate::errors::StorageError;
use crate::repository::{from_rows, to_row, RepositoryBase};
use crate::schema::master_variables;

pub struct MasterVariableRepository {
    base: RepositoryBase,
}

impl MasterVariableRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            base: RepositoryBase::new(manager, SyncTable::MasterVariables),
        }
    }

    fn table(&self) -> &'static str {
        SyncTable::MasterVariables.as_str()
    }

    async fn append_local(&self, variable: &MasterVariable) {
        let row = NewMasterVariableDB::from(variable);
        self.base
            .mirror_local(&variable.variable_name, move |conn| {
                diesel::insert_into(master_variables::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await;
    }
}

/// Keeps the first value seen per name; `records` must be newest first.
fn latest_by_name(names: &[&str], records: &[MasterVariable]) -> HashMap<String, Option<f64>> {
    let mut latest: HashMap<String, Option<f64>> =
        names.iter().map(|name| (name.to_string(), None)).collect();
    for record in records {
        if let Some(slot) = latest.get_mut(&record.variable_name) {
            if slot.is_none() {
                *slot = Some(record.variable_value);
            }
        }
    }
    latest
}

#[async_trait]
impl MasterVariableRepositoryTrait for MasterVariableRepository {
    async fn get_all(&self, category: Option<&str>) -> Vec<MasterVariable> {
        let table = self.table();
        let mut query = RemoteQuery::new().order("date_recorded", true);
        if let Some(category) = category {
            query = query.eq("category", category);
        }
        let remote = self
            .base
            .remote_read("get_all", |remote| async move {
                let result = remote.select(table, &query).await?;
                Ok(Some(from_rows::<MasterVariable>(result.rows)?))
            })
            .await;
        if let Some(records) = remote {
            return records;
        }

        let category = category.map(str::to_string);
        self.base.local_read("get_all", move |conn| {
            let mut query = master_variables::table.into_boxed();
            if let Some(category) = category {
                query = query.filter(master_variables::category.eq(category));
            }
            let rows = query
                .order((
                    master_variables::date_recorded.desc(),
                    master_variables::id.desc(),
                ))
                .select(MasterVariableDB::as_select())
                .load::<MasterVariableDB>(conn)
                .map_err(StorageError::from)?;
            Ok(rows.into_iter().map(MasterVariable::from).collect())
        })
    }

    async fn get_latest(&self, names: &[&str]) -> HashMap<String, Option<f64>> {
        if names.is_empty() {
            return HashMap::new();
        }

        let table = self.table();
        let query = RemoteQuery::new()
            .in_list("variable_name", names.to_vec())
            .order("date_recorded", true);
        let remote = self
            .base
            .remote_read("get_latest", |remote| async move {
                let result = remote.select(table, &query).await?;
                Ok(Some(from_rows::<MasterVariable>(result.rows)?))
            })
            .await;

        let records = match remote {
            Some(records) => records,
            None => {
                let wanted: Vec<String> = names.iter().map(|n| n.to_string()).collect();
                self.base.local_read("get_latest", move |conn| {
                    let rows = master_variables::table
                        .filter(master_variables::variable_name.eq_any(wanted))
                        .order((
                            master_variables::date_recorded.desc(),
                            master_variables::id.desc(),
                        ))
                        .select(MasterVariableDB::as_select())
                        .load::<MasterVariableDB>(conn)
                        .map_err(StorageError::from)?;
                    Ok(rows.into_iter().map(MasterVariable::from).collect())
                })
            }
        };
        latest_by_name(names, &records)
    }

    async fn create(&self, variable: MasterVariable) -> Result<WriteOutcome<MasterVariable>> {
        let row = to_row(&variable)?;
        let inserted = match self.base.remote() {
            Ok(remote) => remote
                .insert(self.table(), vec![Value::Object(row.clone())])
                .await
                .map(|stored| {
                    from_rows::<MasterVariable>(stored)
                        .ok()
                        .and_then(|rows| rows.into_iter().next())
                        .unwrap_or_else(|| variable.clone())
                }),
            Err(err) => Err(err),
        };

        self.append_local(&variable).await;
        match inserted {
            Ok(stored) => Ok(WriteOutcome::Remote(stored)),
            Err(err) => {
                self.base
                    .log_remote_write_failure("insert", &variable.variable_name, &err);
                self.base
                    .enqueue_pending(SyncPayload::Insert(row), &variable.variable_name)
                    .await;
                Ok(WriteOutcome::Queued(variable))
            }
        }
    }
}
