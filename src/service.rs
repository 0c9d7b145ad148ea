//! Typed entry points for the transport layer. Every call names the caller;
//! unauthenticated callers are turned away before any table is touched.

use crate::TablesInstance;
use crate::acl::TableAcl;
use crate::catalog::TableEntry;
use crate::catalog::schema::TableDefinition;
use crate::catalog::types::{DataEtag, Row, RowEtag, RowWrite};
use crate::data::{RowList, RowOutcomeList, RowsPage};
use crate::diff::ChangeSetList;
use crate::error::{ResourceType, TablesError};
use crate::permission::{CallerContext, Scope, ScopeType, TableRole};
use crate::properties::TableProperties;

fn authenticated(caller: &CallerContext) -> Result<(), TablesError> {
    if caller.is_authenticated() {
        return Ok(());
    }
    Err(TablesError::AccessDenied(
        "request carries no authenticated user".into(),
    ))
}

pub trait DataService {
    fn get_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        fetch_limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError>;

    fn get_row(&self, caller: &CallerContext, table_id: &str, row_id: &str)
    -> Result<Row, TablesError>;

    fn create_or_update_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        write: RowWrite,
    ) -> Result<Row, TablesError>;

    fn delete_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: &str,
        row_etag: Option<&RowEtag>,
    ) -> Result<Row, TablesError>;

    fn get_column_names(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<String>, TablesError>;

    /// Batch insert/update/delete; see [`crate::data::DataManager::insert_or_update_rows`].
    fn alter_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        rows: RowList,
    ) -> Result<RowOutcomeList, TablesError>;

    fn get_rows_in_time_range(
        &self,
        caller: &CallerContext,
        table_id: &str,
        start: &str,
        end: Option<&str>,
        cursor: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError>;
}

pub trait DiffService {
    fn get_rows_since(
        &self,
        caller: &CallerContext,
        table_id: &str,
        since: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError>;

    fn get_change_sets_since(
        &self,
        caller: &CallerContext,
        table_id: &str,
        since: Option<DataEtag>,
    ) -> Result<ChangeSetList, TablesError>;

    /// `is_active` selects live rows still at `data_etag` over the logged
    /// state of that change set.
    fn get_change_set_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        data_etag: DataEtag,
        is_active: bool,
        fetch_limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError>;
}

pub trait TableService {
    fn get_tables(&self, caller: &CallerContext) -> Result<Vec<TableEntry>, TablesError>;

    fn get_table(&self, caller: &CallerContext, table_id: &str) -> Result<TableEntry, TablesError>;

    fn create_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        definition: TableDefinition,
    ) -> Result<TableEntry, TablesError>;

    fn delete_table(&self, caller: &CallerContext, table_id: &str) -> Result<(), TablesError>;
}

/// ACL editing by scope kind. Single-entry getters fail with `NotFound` when
/// the scope has no entry.
pub trait TableAclService {
    fn get_acls(&self, caller: &CallerContext, table_id: &str)
    -> Result<Vec<TableAcl>, TablesError>;
    fn get_user_acls(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<TableAcl>, TablesError>;
    fn get_group_acls(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<TableAcl>, TablesError>;
    fn get_default_acl(&self, caller: &CallerContext, table_id: &str)
    -> Result<TableAcl, TablesError>;
    fn get_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
    ) -> Result<TableAcl, TablesError>;
    fn get_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
    ) -> Result<TableAcl, TablesError>;
    fn set_default_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError>;
    fn set_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError>;
    fn set_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError>;
    fn delete_default_acl(&self, caller: &CallerContext, table_id: &str)
    -> Result<(), TablesError>;
    fn delete_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
    ) -> Result<(), TablesError>;
    fn delete_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
    ) -> Result<(), TablesError>;
}

pub trait PropertiesService {
    fn get_properties(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<TableProperties, TablesError>;

    fn set_properties(
        &self,
        caller: &CallerContext,
        table_id: &str,
        properties: TableProperties,
    ) -> Result<TableProperties, TablesError>;
}

impl DataService for TablesInstance {
    fn get_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        fetch_limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError> {
        authenticated(caller)?;
        self.data(table_id, caller).get_rows(fetch_limit, cursor)
    }

    fn get_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: &str,
    ) -> Result<Row, TablesError> {
        authenticated(caller)?;
        self.data(table_id, caller).get_row(row_id)
    }

    fn create_or_update_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        write: RowWrite,
    ) -> Result<Row, TablesError> {
        authenticated(caller)?;
        self.data(table_id, caller).create_or_update_row(write)
    }

    fn delete_row(
        &self,
        caller: &CallerContext,
        table_id: &str,
        row_id: &str,
        row_etag: Option<&RowEtag>,
    ) -> Result<Row, TablesError> {
        authenticated(caller)?;
        self.data(table_id, caller).delete_row(row_id, row_etag)
    }

    fn get_column_names(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<String>, TablesError> {
        authenticated(caller)?;
        self.tables(caller).get_column_names(table_id)
    }

    fn alter_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        rows: RowList,
    ) -> Result<RowOutcomeList, TablesError> {
        authenticated(caller)?;
        self.data(table_id, caller).insert_or_update_rows(rows)
    }

    fn get_rows_in_time_range(
        &self,
        caller: &CallerContext,
        table_id: &str,
        start: &str,
        end: Option<&str>,
        cursor: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError> {
        authenticated(caller)?;
        self.diff(table_id, caller)
            .get_rows_in_time_range(start, end, cursor, fetch_limit)
    }
}

impl DiffService for TablesInstance {
    fn get_rows_since(
        &self,
        caller: &CallerContext,
        table_id: &str,
        since: Option<DataEtag>,
        fetch_limit: Option<usize>,
    ) -> Result<RowsPage<DataEtag>, TablesError> {
        authenticated(caller)?;
        self.diff(table_id, caller).get_rows_since(since, fetch_limit)
    }

    fn get_change_sets_since(
        &self,
        caller: &CallerContext,
        table_id: &str,
        since: Option<DataEtag>,
    ) -> Result<ChangeSetList, TablesError> {
        authenticated(caller)?;
        self.diff(table_id, caller).get_change_sets_since(since)
    }

    fn get_change_set_rows(
        &self,
        caller: &CallerContext,
        table_id: &str,
        data_etag: DataEtag,
        is_active: bool,
        fetch_limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<RowsPage<String>, TablesError> {
        authenticated(caller)?;
        self.diff(table_id, caller)
            .get_change_set_rows(data_etag, is_active, fetch_limit, cursor)
    }
}

impl TableService for TablesInstance {
    fn get_tables(&self, caller: &CallerContext) -> Result<Vec<TableEntry>, TablesError> {
        authenticated(caller)?;
        Ok(self.tables(caller).list_tables())
    }

    fn get_table(&self, caller: &CallerContext, table_id: &str) -> Result<TableEntry, TablesError> {
        authenticated(caller)?;
        self.tables(caller).get_table(table_id)
    }

    fn create_table(
        &self,
        caller: &CallerContext,
        table_id: &str,
        definition: TableDefinition,
    ) -> Result<TableEntry, TablesError> {
        authenticated(caller)?;
        self.tables(caller).create_table(table_id, definition)
    }

    fn delete_table(&self, caller: &CallerContext, table_id: &str) -> Result<(), TablesError> {
        authenticated(caller)?;
        self.tables(caller).delete_table(table_id)
    }
}

impl TablesInstance {
    fn acls_of_type(
        &self,
        caller: &CallerContext,
        table_id: &str,
        scope_type: Option<ScopeType>,
    ) -> Result<Vec<TableAcl>, TablesError> {
        authenticated(caller)?;
        self.acl(table_id, caller).get_acls(scope_type)
    }

    fn single_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        scope: Scope,
    ) -> Result<TableAcl, TablesError> {
        authenticated(caller)?;
        self.acl(table_id, caller)
            .get_acl(&scope)?
            .ok_or_else(|| TablesError::NotFound {
                resource_type: ResourceType::Acl,
                resource_id: format!("{table_id}/{scope}"),
            })
    }

    fn put_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        scope: Scope,
        role: TableRole,
    ) -> Result<TableAcl, TablesError> {
        authenticated(caller)?;
        self.acl(table_id, caller).set_acl(scope, role)
    }

    fn remove_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        scope: Scope,
    ) -> Result<(), TablesError> {
        authenticated(caller)?;
        self.acl(table_id, caller).delete_acl(&scope)
    }
}

impl TableAclService for TablesInstance {
    fn get_acls(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<TableAcl>, TablesError> {
        self.acls_of_type(caller, table_id, None)
    }

    fn get_user_acls(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<TableAcl>, TablesError> {
        self.acls_of_type(caller, table_id, Some(ScopeType::User))
    }

    fn get_group_acls(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<Vec<TableAcl>, TablesError> {
        self.acls_of_type(caller, table_id, Some(ScopeType::Group))
    }

    fn get_default_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<TableAcl, TablesError> {
        self.single_acl(caller, table_id, Scope::DEFAULT)
    }

    fn get_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
    ) -> Result<TableAcl, TablesError> {
        self.single_acl(caller, table_id, Scope::user(user_id))
    }

    fn get_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
    ) -> Result<TableAcl, TablesError> {
        self.single_acl(caller, table_id, Scope::group(group_id))
    }

    fn set_default_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError> {
        self.put_acl(caller, table_id, Scope::DEFAULT, role)
    }

    fn set_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError> {
        self.put_acl(caller, table_id, Scope::user(user_id), role)
    }

    fn set_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
        role: TableRole,
    ) -> Result<TableAcl, TablesError> {
        self.put_acl(caller, table_id, Scope::group(group_id), role)
    }

    fn delete_default_acl(&self, caller: &CallerContext, table_id: &str) -> Result<(), TablesError> {
        self.remove_acl(caller, table_id, Scope::DEFAULT)
    }

    fn delete_user_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        user_id: &str,
    ) -> Result<(), TablesError> {
        self.remove_acl(caller, table_id, Scope::user(user_id))
    }

    fn delete_group_acl(
        &self,
        caller: &CallerContext,
        table_id: &str,
        group_id: &str,
    ) -> Result<(), TablesError> {
        self.remove_acl(caller, table_id, Scope::group(group_id))
    }
}

impl PropertiesService for TablesInstance {
    fn get_properties(
        &self,
        caller: &CallerContext,
        table_id: &str,
    ) -> Result<TableProperties, TablesError> {
        authenticated(caller)?;
        self.properties(table_id, caller).get_properties()
    }

    fn set_properties(
        &self,
        caller: &CallerContext,
        table_id: &str,
        properties: TableProperties,
    ) -> Result<TableProperties, TablesError> {
        authenticated(caller)?;
        self.properties(table_id, caller).set_properties(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::{DataService, TableAclService, TableService};
    use crate::TablesInstance;
    use crate::catalog::schema::TableDefinition;
    use crate::config::TablesConfig;
    use crate::error::TablesErrorCode;
    use crate::permission::{CallerContext, TableRole};

    #[test]
    fn anonymous_calls_are_access_denied() {
        let db = TablesInstance::open_in_memory(TablesConfig::default()).expect("open");
        let alice = CallerContext::new("alice");
        db.create_table(&alice, "t1", TableDefinition::new("t1", vec![]))
            .expect("create");
        db.set_default_acl(&alice, "t1", TableRole::Owner).expect("acl");

        let anon = CallerContext::anonymous();
        let err = db.get_rows(&anon, "t1", None, None).expect_err("anonymous");
        assert_eq!(err.code(), TablesErrorCode::AccessDenied);
        assert_eq!(
            db.get_tables(&anon).expect_err("anonymous").code(),
            TablesErrorCode::AccessDenied
        );
    }

    #[test]
    fn single_acl_getters_report_missing_entries() {
        let db = TablesInstance::open_in_memory(TablesConfig::default()).expect("open");
        let alice = CallerContext::new("alice");
        db.create_table(&alice, "t1", TableDefinition::new("t1", vec![]))
            .expect("create");
        assert_eq!(
            db.get_default_acl(&alice, "t1").expect_err("none").code(),
            TablesErrorCode::NotFound
        );
        assert_eq!(
            db.get_user_acl(&alice, "t1", "alice").expect("own").role,
            TableRole::Owner
        );
        db.set_group_acl(&alice, "t1", "field", TableRole::FilteredWriter)
            .expect("group");
        assert_eq!(db.get_group_acls(&alice, "t1").expect("groups").len(), 1);
        assert_eq!(db.get_user_acls(&alice, "t1").expect("users").len(), 1);
        db.delete_group_acl(&alice, "t1", "field").expect("delete");
        assert_eq!(
            db.delete_group_acl(&alice, "t1", "field")
                .expect_err("missing")
                .code(),
            TablesErrorCode::NotFound
        );
    }
}
