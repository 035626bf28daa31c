//! Database models for the detail mirror tables.
//!
//! Local ids come from the local autoincrement sequence and are never sent to
//! the remote store, so the insert shapes carry no id.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use gatekeeper_core::details::{DetailRow, FixedCost, RecurringService};
use gatekeeper_core::sync::SyncTable;
use gatekeeper_core::Result;

use crate::errors::StorageError;
use crate::repository::{enum_from_db, enum_to_db};
use crate::schema::{fixed_costs, recurring_services};

/// Local mirror operations of one detail collection.
pub trait DetailMirror: DetailRow + Serialize + DeserializeOwned {
    const TABLE: SyncTable;

    fn load_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<Vec<Self>>;

    /// Swaps the whole local set for `transaction_id` inside the caller's transaction.
    fn replace_local(
        conn: &mut SqliteConnection,
        transaction_id: &str,
        rows: &[Self],
    ) -> Result<()>;

    fn delete_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<usize>;
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::fixed_costs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FixedCostDB {
    pub id: i64,
    pub transaction_id: Option<String>,
    pub categoria: Option<String>,
    pub tipo_servicio: Option<String>,
    pub ticket: Option<String>,
    pub ubicacion: Option<String>,
    pub cantidad: Option<f64>,
    pub costo_unitario_original: Option<f64>,
    pub costo_unitario_currency: String,
    pub costo_unitario_pen: Option<f64>,
    pub periodo_inicio: i32,
    pub duracion_meses: i32,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::fixed_costs)]
pub struct NewFixedCostDB {
    pub transaction_id: Option<String>,
    pub categoria: Option<String>,
    pub tipo_servicio: Option<String>,
    pub ticket: Option<String>,
    pub ubicacion: Option<String>,
    pub cantidad: Option<f64>,
    pub costo_unitario_original: Option<f64>,
    pub costo_unitario_currency: String,
    pub costo_unitario_pen: Option<f64>,
    pub periodo_inicio: i32,
    pub duracion_meses: i32,
}

impl From<FixedCostDB> for FixedCost {
    fn from(db: FixedCostDB) -> Self {
        Self {
            id: Some(db.id),
            transaction_id: db.transaction_id,
            categoria: db.categoria,
            tipo_servicio: db.tipo_servicio,
            ticket: db.ticket,
            ubicacion: db.ubicacion,
            cantidad: db.cantidad,
            costo_unitario_original: db.costo_unitario_original,
            costo_unitario_currency: enum_from_db(&db.costo_unitario_currency)
                .unwrap_or_default(),
            costo_unitario_pen: db.costo_unitario_pen,
            periodo_inicio: db.periodo_inicio,
            duracion_meses: db.duracion_meses,
        }
    }
}

impl NewFixedCostDB {
    fn from_entity(cost: &FixedCost, transaction_id: &str) -> Result<Self> {
        Ok(Self {
            transaction_id: Some(transaction_id.to_string()),
            categoria: cost.categoria.clone(),
            tipo_servicio: cost.tipo_servicio.clone(),
            ticket: cost.ticket.clone(),
            ubicacion: cost.ubicacion.clone(),
            cantidad: cost.cantidad,
            costo_unitario_original: cost.costo_unitario_original,
            costo_unitario_currency: enum_to_db(&cost.costo_unitario_currency)?,
            costo_unitario_pen: cost.costo_unitario_pen,
            periodo_inicio: cost.periodo_inicio,
            duracion_meses: cost.duracion_meses,
        })
    }
}

impl DetailMirror for FixedCost {
    const TABLE: SyncTable = SyncTable::FixedCosts;

    fn load_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<Vec<Self>> {
        let rows = fixed_costs::table
            .filter(fixed_costs::transaction_id.eq(transaction_id))
            .order(fixed_costs::id.asc())
            .select(FixedCostDB::as_select())
            .load::<FixedCostDB>(conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(FixedCost::from).collect())
    }

    fn replace_local(
        conn: &mut SqliteConnection,
        transaction_id: &str,
        rows: &[Self],
    ) -> Result<()> {
        Self::delete_local(conn, transaction_id)?;
        let new_rows = rows
            .iter()
            .map(|row| NewFixedCostDB::from_entity(row, transaction_id))
            .collect::<Result<Vec<_>>>()?;
        for row in &new_rows {
            diesel::insert_into(fixed_costs::table)
                .values(row)
                .execute(conn)
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn delete_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<usize> {
        let deleted = diesel::delete(
            fixed_costs::table.filter(fixed_costs::transaction_id.eq(transaction_id)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
        Ok(deleted)
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::recurring_services)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RecurringServiceDB {
    pub id: i64,
    pub transaction_id: Option<String>,
    pub tipo_servicio: Option<String>,
    pub nota: Option<String>,
    pub ubicacion: Option<String>,
    pub quantity: Option<f64>,
    pub price_original: Option<f64>,
    pub price_currency: String,
    pub price_pen: Option<f64>,
    pub cost_unit_1_original: Option<f64>,
    pub cost_unit_2_original: Option<f64>,
    pub cost_unit_currency: String,
    pub cost_unit_1_pen: Option<f64>,
    pub cost_unit_2_pen: Option<f64>,
    pub proveedor: Option<String>,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::recurring_services)]
pub struct NewRecurringServiceDB {
    pub transaction_id: Option<String>,
    pub tipo_servicio: Option<String>,
    pub nota: Option<String>,
    pub ubicacion: Option<String>,
    pub quantity: Option<f64>,
    pub price_original: Option<f64>,
    pub price_currency: String,
    pub price_pen: Option<f64>,
    pub cost_unit_1_original: Option<f64>,
    pub cost_unit_2_original: Option<f64>,
    pub cost_unit_currency: String,
    pub cost_unit_1_pen: Option<f64>,
    pub cost_unit_2_pen: Option<f64>,
    pub proveedor: Option<String>,
}

impl From<RecurringServiceDB> for RecurringService {
    fn from(db: RecurringServiceDB) -> Self {
        Self {
            id: Some(db.id),
            transaction_id: db.transaction_id,
            tipo_servicio: db.tipo_servicio,
            nota: db.nota,
            ubicacion: db.ubicacion,
            quantity: db.quantity,
            price_original: db.price_original,
            price_currency: enum_from_db(&db.price_currency).unwrap_or_default(),
            price_pen: db.price_pen,
            cost_unit_1_original: db.cost_unit_1_original,
            cost_unit_2_original: db.cost_unit_2_original,
            cost_unit_currency: enum_from_db(&db.cost_unit_currency).unwrap_or_default(),
            cost_unit_1_pen: db.cost_unit_1_pen,
            cost_unit_2_pen: db.cost_unit_2_pen,
            proveedor: db.proveedor,
        }
    }
}

impl NewRecurringServiceDB {
    fn from_entity(service: &RecurringService, transaction_id: &str) -> Result<Self> {
        Ok(Self {
            transaction_id: Some(transaction_id.to_string()),
            tipo_servicio: service.tipo_servicio.clone(),
            nota: service.nota.clone(),
            ubicacion: service.ubicacion.clone(),
            quantity: service.quantity,
            price_original: service.price_original,
            price_currency: enum_to_db(&service.price_currency)?,
            price_pen: service.price_pen,
            cost_unit_1_original: service.cost_unit_1_original,
            cost_unit_2_original: service.cost_unit_2_original,
            cost_unit_currency: enum_to_db(&service.cost_unit_currency)?,
            cost_unit_1_pen: service.cost_unit_1_pen,
            cost_unit_2_pen: service.cost_unit_2_pen,
            proveedor: service.proveedor.clone(),
        })
    }
}

impl DetailMirror for RecurringService {
    const TABLE: SyncTable = SyncTable::RecurringServices;

    fn load_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<Vec<Self>> {
        let rows = recurring_services::table
            .filter(recurring_services::transaction_id.eq(transaction_id))
            .order(recurring_services::id.asc())
            .select(RecurringServiceDB::as_select())
            .load::<RecurringServiceDB>(conn)
            .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(RecurringService::from).collect())
    }

    fn replace_local(
        conn: &mut SqliteConnection,
        transaction_id: &str,
        rows: &[Self],
    ) -> Result<()> {
        Self::delete_local(conn, transaction_id)?;
        let new_rows = rows
            .iter()
            .map(|row| NewRecurringServiceDB::from_entity(row, transaction_id))
            .collect::<Result<Vec<_>>>()?;
        for row in &new_rows {
            diesel::insert_into(recurring_services::table)
                .values(row)
                .execute(conn)
                .map_err(StorageError::from)?;
        }
        Ok(())
    }

    fn delete_local(conn: &mut SqliteConnection, transaction_id: &str) -> Result<usize> {
        let deleted = diesel::delete(
            recurring_services::table
                .filter(recurring_services::transaction_id.eq(transaction_id)),
        )
        .execute(conn)
        .map_err(StorageError::from)?;
        Ok(deleted)
    }
}
