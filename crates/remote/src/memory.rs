//! In-process `RemoteStore` used by tests and offline demos.
//!
//! Rows live in a per-table vector. Failures can be scripted per table and
//! verb, and the whole store can be switched to "unreachable".

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use gatekeeper_core::remote::{Filter, RemoteQuery, RemoteRows, RemoteStore};
use gatekeeper_core::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteVerb {
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<Value>>,
    failures: HashMap<(String, RemoteVerb), usize>,
    calls: HashMap<(String, RemoteVerb), usize>,
    offline: bool,
}

impl MemoryState {
    /// Records the call, then applies the offline switch and scripted failures.
    fn admit(&mut self, table: &str, verb: RemoteVerb) -> Result<()> {
        *self.calls.entry((table.to_string(), verb)).or_default() += 1;
        if self.offline {
            return Err(Error::remote("remote store unreachable"));
        }
        if let Some(remaining) = self.failures.get_mut(&(table.to_string(), verb)) {
            if *remaining > 0 {
                *remaining -= 1;
                debug!("Injected {:?} failure on '{}'", verb, table);
                return Err(Error::remote_status(503, format!("injected {:?} failure", verb)));
            }
        }
        Ok(())
    }

    fn table(&mut self, table: &str) -> &mut Vec<Value> {
        self.tables.entry(table.to_string()).or_default()
    }

    fn insert_row(&mut self, table: &str, row: Value) -> Result<Value> {
        let Value::Object(mut object) = row else {
            return Err(Error::remote_status(400, "row must be a JSON object"));
        };
        let rows = self.table(table);
        match object.get("id") {
            None | Some(Value::Null) => {
                let next = rows
                    .iter()
                    .filter_map(|r| r.get("id").and_then(Value::as_i64))
                    .max()
                    .unwrap_or(0)
                    + 1;
                object.insert("id".to_string(), Value::from(next));
            }
            Some(id) => {
                if rows.iter().any(|r| r.get("id") == Some(id)) {
                    return Err(Error::remote_status(
                        409,
                        format!("duplicate key value violates unique constraint: id={}", id),
                    ));
                }
            }
        }
        let row = Value::Object(object);
        rows.push(row.clone());
        Ok(row)
    }
}

/// Thread-safe in-memory table store.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `times` calls of `verb` on `table` fail with a 503.
    pub fn fail_next(&self, table: &str, verb: RemoteVerb, times: usize) {
        self.lock()
            .failures
            .insert((table.to_string(), verb), times);
    }

    /// While offline every call fails as if the network were down.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Inserts rows directly, bypassing failure injection. Missing ids are assigned.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.lock();
        for row in rows {
            if let Err(err) = state.insert_row(table, row) {
                debug!("Skipping seed row for '{}': {}", table, err);
            }
        }
    }

    /// Snapshot of a table in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Number of calls (successful or not) made for `verb` on `table`.
    pub fn call_count(&self, table: &str, verb: RemoteVerb) -> usize {
        self.lock()
            .calls
            .get(&(table.to_string(), verb))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn select(&self, table: &str, query: &RemoteQuery) -> Result<RemoteRows> {
        let mut state = self.lock();
        state.admit(table, RemoteVerb::Select)?;

        let mut rows: Vec<Value> = state
            .table(table)
            .iter()
            .filter(|row| query.filters.iter().all(|f| matches_filter(row, f)))
            .cloned()
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                compare_nullable(a.get(&order.column), b.get(&order.column), order.descending)
            });
        }

        let count = query.count.then_some(rows.len());
        if let Some((from, to)) = query.range {
            rows = rows
                .into_iter()
                .skip(from)
                .take(to.saturating_sub(from) + 1)
                .collect();
        }
        if let Some(columns) = query.columns.as_deref().filter(|c| c.trim() != "*") {
            rows = rows.into_iter().map(|row| project(row, columns)).collect();
        }

        Ok(RemoteRows { rows, count })
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut state = self.lock();
        state.admit(table, RemoteVerb::Insert)?;

        // All-or-nothing, like a single INSERT statement.
        let before = state.table(table).clone();
        let mut inserted = Vec::with_capacity(rows.len());
        for row in rows {
            match state.insert_row(table, row) {
                Ok(row) => inserted.push(row),
                Err(err) => {
                    *state.table(table) = before;
                    return Err(err);
                }
            }
        }
        Ok(inserted)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        let mut state = self.lock();
        state.admit(table, RemoteVerb::Update)?;
        let Value::Object(patch) = patch else {
            return Err(Error::remote_status(400, "patch must be a JSON object"));
        };

        let mut updated = Vec::new();
        for row in state.table(table).iter_mut() {
            if filters.iter().all(|f| matches_filter(row, f)) {
                merge(row, &patch);
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut state = self.lock();
        state.admit(table, RemoteVerb::Upsert)?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(object) = row else {
                return Err(Error::remote_status(400, "row must be a JSON object"));
            };
            let existing = object.get("id").filter(|id| !id.is_null()).and_then(|id| {
                state
                    .table(table)
                    .iter()
                    .position(|r| r.get("id") == Some(id))
            });
            match existing {
                Some(index) => {
                    let target = &mut state.table(table)[index];
                    merge(target, &object);
                    stored.push(target.clone());
                }
                None => stored.push(state.insert_row(table, Value::Object(object))?),
            }
        }
        Ok(stored)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Value>> {
        let mut state = self.lock();
        state.admit(table, RemoteVerb::Delete)?;

        let (removed, kept): (Vec<Value>, Vec<Value>) = state
            .table(table)
            .drain(..)
            .partition(|row| filters.iter().all(|f| matches_filter(row, f)));
        *state.table(table) = kept;
        Ok(removed)
    }
}

fn merge(target: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(object) = target {
        for (key, value) in patch {
            object.insert(key.clone(), value.clone());
        }
    }
}

fn project(row: Value, columns: &str) -> Value {
    let Value::Object(object) = row else {
        return row;
    };
    let wanted: Vec<&str> = columns.split(',').map(str::trim).collect();
    Value::Object(
        object
            .into_iter()
            .filter(|(key, _)| wanted.contains(&key.as_str()))
            .collect(),
    )
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, Value::Null) => row.get(column).map_or(true, Value::is_null),
        Filter::Eq(column, expected) => {
            compare(row.get(column), expected) == Some(Ordering::Equal)
        }
        Filter::Gte(column, bound) => matches!(
            compare(row.get(column), bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Filter::Lte(column, bound) => matches!(
            compare(row.get(column), bound),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Filter::In(column, values) => values
            .iter()
            .any(|v| compare(row.get(column), v) == Some(Ordering::Equal)),
        Filter::OrIlike { columns, term } => {
            let term = term.to_lowercase();
            columns.iter().any(|column| {
                row.get(column)
                    .and_then(text_of)
                    .is_some_and(|text| text.to_lowercase().contains(&term))
            })
        }
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Compares a stored value against a filter operand: instants first, then
/// numbers, then plain text. Missing and null values never compare.
fn compare(stored: Option<&Value>, operand: &Value) -> Option<Ordering> {
    let stored = stored.filter(|v| !v.is_null())?;
    match (stored, operand) {
        (Value::String(a), Value::String(b)) => {
            if let (Some(a), Some(b)) = (parse_instant(a), parse_instant(b)) {
                return Some(a.cmp(&b));
            }
            Some(a.cmp(b))
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Ordering for sorts: nulls last in both directions (`nullslast`).
fn compare_nullable(a: Option<&Value>, b: Option<&Value>, descending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ordering = compare(Some(a), b).unwrap_or(Ordering::Equal);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}
