//! Typed queue payloads, one concrete shape per operation.

use serde_json::{Map, Value};
use thiserror::Error;

use super::SyncOperation;

/// A JSON object keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Insert(Row),
    /// Full-row update by entity id.
    Update(Row),
    /// Status-only patch by entity id.
    UpdateStatus(Row),
    Upsert(Row),
    /// Complete desired child set for one parent id.
    Replace(Vec<Row>),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Unknown sync operation '{0}'")]
    UnknownOperation(String),

    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Payload for '{operation}' must be {expected}")]
    Shape {
        operation: SyncOperation,
        expected: &'static str,
    },
}

impl SyncPayload {
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Insert(_) => SyncOperation::Insert,
            Self::Update(_) => SyncOperation::Update,
            Self::UpdateStatus(_) => SyncOperation::UpdateStatus,
            Self::Upsert(_) => SyncOperation::Upsert,
            Self::Replace(_) => SyncOperation::Replace,
        }
    }

    /// Builds a single-row payload from any serializable value.
    pub fn row(operation: SyncOperation, value: Value) -> Result<Self, PayloadError> {
        match operation {
            SyncOperation::Insert => object_row(operation, value).map(Self::Insert),
            SyncOperation::Update => object_row(operation, value).map(Self::Update),
            SyncOperation::UpdateStatus => object_row(operation, value).map(Self::UpdateStatus),
            SyncOperation::Upsert => object_row(operation, value).map(Self::Upsert),
            SyncOperation::Replace => match value {
                Value::Array(items) => Ok(Self::Replace(rows_from(items)?)),
                _ => Err(PayloadError::Shape {
                    operation,
                    expected: "an array of objects",
                }),
            },
        }
    }

    /// Decodes the raw `(operation, payload)` columns of a queue row.
    pub fn decode(operation: &str, raw: &str) -> Result<Self, PayloadError> {
        let op: SyncOperation = operation
            .parse()
            .map_err(|_| PayloadError::UnknownOperation(operation.to_string()))?;
        let value: Value = serde_json::from_str(raw)?;
        Self::row(op, value)
    }

    pub fn encode(&self) -> Result<String, PayloadError> {
        let value = match self {
            Self::Insert(row) | Self::Update(row) | Self::UpdateStatus(row) | Self::Upsert(row) => {
                Value::Object(row.clone())
            }
            Self::Replace(rows) => Value::Array(rows.iter().cloned().map(Value::Object).collect()),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

fn object_row(operation: SyncOperation, value: Value) -> Result<Row, PayloadError> {
    match value {
        Value::Object(row) => Ok(row),
        _ => Err(PayloadError::Shape {
            operation,
            expected: "an object",
        }),
    }
}

fn rows_from(items: Vec<Value>) -> Result<Vec<Row>, PayloadError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            _ => Err(PayloadError::Shape {
                operation: SyncOperation::Replace,
                expected: "an array of objects",
            }),
        })
        .collect()
}
