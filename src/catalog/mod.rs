pub mod schema;
pub mod types;

use crate::catalog::schema::{ColumnDef, SchemaType, TableDefinition};
use crate::catalog::types::{DataEtag, RowValues};
use crate::error::TablesError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableEntry {
    pub table_id: String,
    pub table_key: String,
    pub schema_type: SchemaType,
    pub data_etag: DataEtag,
    pub properties_etag: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl TableEntry {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Every key of `values` must name one of this table's columns, and
    /// explicit nulls are only accepted for nullable columns.
    pub fn validate_values(&self, values: &RowValues) -> Result<(), TablesError> {
        for (column, value) in values {
            let Some(def) = self.columns.iter().find(|c| &c.name == column) else {
                return Err(TablesError::BadColumnName {
                    table_id: self.table_id.clone(),
                    column: column.clone(),
                });
            };
            if value.is_none() && !def.nullable {
                return Err(TablesError::InvalidArgument(format!(
                    "column '{column}' of table '{}' is not nullable",
                    self.table_id
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_identifier(kind: &str, value: &str) -> Result<(), TablesError> {
    if value.trim().is_empty() {
        return Err(TablesError::InvalidArgument(format!("{kind} must not be empty")));
    }
    if value.chars().any(char::is_control) {
        return Err(TablesError::InvalidArgument(format!(
            "{kind} '{}' contains control characters",
            value.escape_debug()
        )));
    }
    Ok(())
}

pub(crate) fn validate_definition(
    table_id: &str,
    definition: &TableDefinition,
) -> Result<(), TablesError> {
    validate_identifier("table id", table_id)?;
    validate_identifier("table key", &definition.table_key)?;
    let mut seen = HashSet::with_capacity(definition.columns.len());
    for column in &definition.columns {
        if column.name.trim().is_empty() || !seen.insert(column.name.as_str()) {
            return Err(TablesError::BadColumnName {
                table_id: table_id.to_string(),
                column: column.name.clone(),
            });
        }
    }
    Ok(())
}
