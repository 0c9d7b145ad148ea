use crate::auth::AuthFilter;
use crate::catalog::schema::TableDefinition;
use crate::catalog::types::DataEtag;
use crate::catalog::{TableEntry, validate_definition};
use crate::error::TablesError;
use crate::permission::{CallerContext, Scope, TablePermission, TableRole};
use crate::storage::Datastore;
use crate::storage::table_state::TableState;
use tracing::info;

/// Table lifecycle on behalf of one caller.
pub struct TableManager<'a> {
    store: &'a Datastore,
    caller: CallerContext,
}

impl<'a> TableManager<'a> {
    pub fn new(store: &'a Datastore, caller: CallerContext) -> Self {
        Self { store, caller }
    }

    /// Registers a new table. The creator is granted OWNER on their own USER
    /// scope; nobody else has access until ACLs are added.
    pub fn create_table(
        &self,
        table_id: &str,
        definition: TableDefinition,
    ) -> Result<TableEntry, TablesError> {
        let Some(creator) = self.caller.user_id.clone() else {
            return Err(TablesError::AccessDenied(
                "creating a table requires an authenticated caller".into(),
            ));
        };
        validate_definition(table_id, &definition)?;
        if self.store.contains(table_id) {
            return Err(TablesError::TableAlreadyExists {
                table_id: table_id.to_string(),
            });
        }
        let mut state = TableState::new(TableEntry {
            table_id: table_id.to_string(),
            table_key: definition.table_key,
            schema_type: definition.schema_type,
            data_etag: DataEtag(self.store.next_sequence()),
            properties_etag: uuid::Uuid::new_v4().to_string(),
            columns: definition.columns,
            created_by: Some(creator.clone()),
        });
        state.acls.insert(Scope::user(creator.clone()), TableRole::Owner);
        let committed = self.store.register(state)?;
        info!(
            table_id,
            table_key = %committed.entry.table_key,
            columns = committed.entry.columns.len(),
            data_etag = %committed.entry.data_etag,
            creator = %creator,
            "table created"
        );
        Ok(committed.entry.clone())
    }

    pub fn get_table(&self, table_id: &str) -> Result<TableEntry, TablesError> {
        let state = self.store.read_table(table_id)?;
        AuthFilter::new(&self.caller, &state).check_permission(TablePermission::ReadTableEntry)?;
        Ok(state.entry.clone())
    }

    pub fn get_column_names(&self, table_id: &str) -> Result<Vec<String>, TablesError> {
        Ok(self.get_table(table_id)?.column_names())
    }

    /// Tables the caller may see, ordered by table id.
    pub fn list_tables(&self) -> Vec<TableEntry> {
        self.store
            .read_all()
            .iter()
            .filter(|state| {
                AuthFilter::new(&self.caller, state).has_permission(TablePermission::ReadTableEntry)
            })
            .map(|state| state.entry.clone())
            .collect()
    }

    /// Drops the table with its rows, change log, ACLs and properties.
    pub fn delete_table(&self, table_id: &str) -> Result<(), TablesError> {
        let last = self.store.remove(table_id, |state| {
            AuthFilter::new(&self.caller, state).check_permission(TablePermission::DeleteTable)
        })?;
        info!(
            table_id,
            rows = last.rows.len(),
            final_data_etag = %last.entry.data_etag,
            caller = self.caller.display_id(),
            "table deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TableManager;
    use crate::catalog::schema::{ColumnDef, ColumnType, TableDefinition};
    use crate::config::TablesConfig;
    use crate::error::TablesErrorCode;
    use crate::permission::{CallerContext, Scope, TableRole};
    use crate::storage::Datastore;

    fn definition(key: &str) -> TableDefinition {
        TableDefinition::new(
            key,
            vec![
                ColumnDef::new("name", ColumnType::String),
                ColumnDef::new("age", ColumnType::Integer),
            ],
        )
    }

    #[test]
    fn creator_owns_new_table() {
        let store = Datastore::new(TablesConfig::default());
        let tables = TableManager::new(&store, CallerContext::new("alice"));
        let entry = tables.create_table("people", definition("people-key")).expect("create");
        assert_eq!(entry.created_by.as_deref(), Some("alice"));
        assert!(entry.data_etag.sequence() > 0);

        let state = store.read_table("people").expect("state");
        assert_eq!(state.acls.get(&Scope::user("alice")), Some(&TableRole::Owner));
        assert_eq!(
            tables.get_column_names("people").expect("columns"),
            vec!["name".to_string(), "age".to_string()]
        );
    }

    #[test]
    fn duplicate_id_or_key_is_rejected() {
        let store = Datastore::new(TablesConfig::default());
        let tables = TableManager::new(&store, CallerContext::new("alice"));
        tables.create_table("people", definition("k1")).expect("create");
        let err = tables.create_table("people", definition("k2")).expect_err("dup id");
        assert_eq!(err.code(), TablesErrorCode::TableAlreadyExists);
        let err = tables.create_table("others", definition("k1")).expect_err("dup key");
        assert_eq!(err.code(), TablesErrorCode::TableAlreadyExists);
    }

    #[test]
    fn anonymous_callers_cannot_create() {
        let store = Datastore::new(TablesConfig::default());
        let err = TableManager::new(&store, CallerContext::anonymous())
            .create_table("people", definition("k1"))
            .expect_err("anonymous");
        assert_eq!(err.code(), TablesErrorCode::AccessDenied);
    }

    #[test]
    fn listing_hides_tables_without_access() {
        let store = Datastore::new(TablesConfig::default());
        TableManager::new(&store, CallerContext::new("alice"))
            .create_table("a", definition("ka"))
            .expect("a");
        TableManager::new(&store, CallerContext::new("bob"))
            .create_table("b", definition("kb"))
            .expect("b");
        let visible: Vec<String> = TableManager::new(&store, CallerContext::new("bob"))
            .list_tables()
            .into_iter()
            .map(|t| t.table_id)
            .collect();
        assert_eq!(visible, vec!["b".to_string()]);
    }

    #[test]
    fn only_owner_deletes_and_recreation_gets_a_newer_etag() {
        let store = Datastore::new(TablesConfig::default());
        let alice = TableManager::new(&store, CallerContext::new("alice"));
        let first = alice.create_table("people", definition("k1")).expect("create");

        let err = TableManager::new(&store, CallerContext::new("bob"))
            .delete_table("people")
            .expect_err("not owner");
        assert_eq!(err.code(), TablesErrorCode::PermissionDenied);

        alice.delete_table("people").expect("delete");
        assert_eq!(
            alice.get_table("people").expect_err("gone").code(),
            TablesErrorCode::NotFound
        );
        let second = alice.create_table("people", definition("k1")).expect("recreate");
        assert!(second.data_etag > first.data_etag);
    }
}
