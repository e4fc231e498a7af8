// ABOUTME: Projection of domain records onto a relational storage row.
// ABOUTME: The row keeps the JSON document plus one extracted indexed column.

use serde::Serialize;

use crate::model::Deployment;

/// What a document-in-a-table backend writes for one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRow {
    pub id: String,
    /// Indexed column derived from the record.
    pub extra: String,
    pub data: serde_json::Value,
}

pub trait ToStorageRow {
    fn to_storage_row(&self) -> Result<StorageRow, serde_json::Error>;
}

impl ToStorageRow for Deployment {
    fn to_storage_row(&self) -> Result<StorageRow, serde_json::Error> {
        Ok(StorageRow {
            id: self.id.to_string(),
            extra: self.id.to_string(),
            data: serde_json::to_value(self)?,
        })
    }
}
