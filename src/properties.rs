use crate::auth::AuthFilter;
use crate::catalog::types::PropertyEntry;
use crate::catalog::validate_identifier;
use crate::error::TablesError;
use crate::permission::{CallerContext, TablePermission};
use crate::storage::Datastore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableProperties {
    pub table_key: String,
    pub properties_etag: String,
    pub entries: Vec<PropertyEntry>,
}

pub struct PropertiesManager<'a> {
    store: &'a Datastore,
    table_id: String,
    caller: CallerContext,
}

impl<'a> PropertiesManager<'a> {
    pub fn new(store: &'a Datastore, table_id: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            store,
            table_id: table_id.into(),
            caller,
        }
    }

    pub fn get_properties(&self) -> Result<TableProperties, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        AuthFilter::new(&self.caller, &state).check_permission(TablePermission::ReadProperties)?;
        Ok(TableProperties {
            table_key: state.entry.table_key.clone(),
            properties_etag: state.entry.properties_etag.clone(),
            entries: state.properties.clone(),
        })
    }

    /// Replaces every entry. `properties.properties_etag` must be the etag the
    /// caller last read; the returned value carries the new one.
    pub fn set_properties(
        &self,
        properties: TableProperties,
    ) -> Result<TableProperties, TablesError> {
        let mut seen = HashSet::with_capacity(properties.entries.len());
        for entry in &properties.entries {
            validate_identifier("property partition", &entry.partition)?;
            validate_identifier("property aspect", &entry.aspect)?;
            validate_identifier("property key", &entry.key)?;
            if !seen.insert((&entry.partition, &entry.aspect, &entry.key)) {
                return Err(TablesError::InvalidArgument(format!(
                    "duplicate property {}/{}/{}",
                    entry.partition, entry.aspect, entry.key
                )));
            }
        }
        let updated = self.store.mutate(&self.table_id, |state| {
            AuthFilter::new(&self.caller, state)
                .check_permission(TablePermission::WriteProperties)?;
            if properties.table_key != state.entry.table_key {
                return Err(TablesError::InvalidArgument(format!(
                    "table key '{}' does not match table '{}'",
                    properties.table_key, self.table_id
                )));
            }
            if properties.properties_etag != state.entry.properties_etag {
                return Err(TablesError::EtagMismatch {
                    resource: format!("properties of table {}", self.table_id),
                    supplied: properties.properties_etag.clone(),
                    current: state.entry.properties_etag.clone(),
                });
            }
            state.entry.properties_etag = uuid::Uuid::new_v4().to_string();
            state.properties = properties.entries.clone();
            Ok(TableProperties {
                table_key: state.entry.table_key.clone(),
                properties_etag: state.entry.properties_etag.clone(),
                entries: state.properties.clone(),
            })
        })?;
        info!(
            table_id = %self.table_id,
            entries = updated.entries.len(),
            properties_etag = %updated.properties_etag,
            caller = self.caller.display_id(),
            "table properties replaced"
        );
        Ok(updated)
    }
}
