use crate::auth::AuthFilter;
use crate::error::{ResourceType, TablesError};
use crate::permission::{CallerContext, Scope, ScopeType, TablePermission, TableRole};
use crate::storage::Datastore;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableAcl {
    pub table_id: String,
    pub scope: Scope,
    pub role: TableRole,
}

/// Reads and edits the (scope -> role) assignments of one table on behalf of
/// one caller.
pub struct TableAclManager<'a> {
    store: &'a Datastore,
    table_id: String,
    caller: CallerContext,
}

impl<'a> TableAclManager<'a> {
    pub fn new(store: &'a Datastore, table_id: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            store,
            table_id: table_id.into(),
            caller,
        }
    }

    pub fn get_acl(&self, scope: &Scope) -> Result<Option<TableAcl>, TablesError> {
        scope.validate()?;
        let state = self.store.read_table(&self.table_id)?;
        AuthFilter::new(&self.caller, &state).check_permission(TablePermission::ReadAcl)?;
        Ok(state.acls.get(scope).map(|role| TableAcl {
            table_id: self.table_id.clone(),
            scope: scope.clone(),
            role: *role,
        }))
    }

    /// All entries, optionally narrowed to one scope type, in scope order.
    pub fn get_acls(&self, scope_type: Option<ScopeType>) -> Result<Vec<TableAcl>, TablesError> {
        let state = self.store.read_table(&self.table_id)?;
        AuthFilter::new(&self.caller, &state).check_permission(TablePermission::ReadAcl)?;
        Ok(state
            .acls
            .iter()
            .filter(|(scope, _)| scope_type.is_none_or(|t| scope.scope_type == t))
            .map(|(scope, role)| TableAcl {
                table_id: self.table_id.clone(),
                scope: scope.clone(),
                role: *role,
            })
            .collect())
    }

    pub fn set_acl(&self, scope: Scope, role: TableRole) -> Result<TableAcl, TablesError> {
        scope.validate()?;
        self.store.mutate(&self.table_id, |state| {
            AuthFilter::new(&self.caller, state).check_permission(TablePermission::WriteAcl)?;
            state.acls.insert(scope.clone(), role);
            Ok(())
        })?;
        info!(
            table_id = %self.table_id,
            scope = %scope,
            role = ?role,
            caller = self.caller.display_id(),
            "acl set"
        );
        Ok(TableAcl {
            table_id: self.table_id.clone(),
            scope,
            role,
        })
    }

    pub fn delete_acl(&self, scope: &Scope) -> Result<(), TablesError> {
        scope.validate()?;
        self.store.mutate(&self.table_id, |state| {
            AuthFilter::new(&self.caller, state).check_permission(TablePermission::DeleteAcl)?;
            match state.acls.remove(scope) {
                Some(_) => Ok(()),
                None => Err(TablesError::NotFound {
                    resource_type: ResourceType::Acl,
                    resource_id: format!("{}/{scope}", self.table_id),
                }),
            }
        })?;
        info!(
            table_id = %self.table_id,
            scope = %scope,
            caller = self.caller.display_id(),
            "acl deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::TableAclManager;
    use crate::catalog::TableEntry;
    use crate::catalog::schema::SchemaType;
    use crate::catalog::types::DataEtag;
    use crate::config::TablesConfig;
    use crate::error::TablesErrorCode;
    use crate::permission::{CallerContext, Scope, ScopeType, TableRole};
    use crate::storage::Datastore;
    use crate::storage::table_state::TableState;

    fn store_owned_by(owner: &str) -> Datastore {
        let store = Datastore::new(TablesConfig::default());
        let mut state = TableState::new(TableEntry {
            table_id: "t1".into(),
            table_key: "t1".into(),
            schema_type: SchemaType::Data,
            data_etag: DataEtag(1),
            properties_etag: "p".into(),
            columns: vec![],
            created_by: Some(owner.into()),
        });
        state.acls.insert(Scope::user(owner), TableRole::Owner);
        store.register(state).expect("register");
        store
    }

    #[test]
    fn owner_sets_lists_and_deletes_entries() {
        let store = store_owned_by("alice");
        let acl = TableAclManager::new(&store, "t1", CallerContext::new("alice"));
        acl.set_acl(Scope::DEFAULT, TableRole::Reader).expect("default");
        acl.set_acl(Scope::group("g1"), TableRole::Writer).expect("group");
        acl.set_acl(Scope::group("g1"), TableRole::FilteredWriter)
            .expect("upsert");

        let groups = acl.get_acls(Some(ScopeType::Group)).expect("groups");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].role, TableRole::FilteredWriter);
        assert_eq!(acl.get_acls(None).expect("all").len(), 3);

        acl.delete_acl(&Scope::group("g1")).expect("delete");
        assert_eq!(acl.get_acl(&Scope::group("g1")).expect("get"), None);
        let err = acl.delete_acl(&Scope::group("g1")).expect_err("gone");
        assert_eq!(err.code(), TablesErrorCode::NotFound);
    }

    #[test]
    fn acl_changes_leave_data_etag_alone() {
        let store = store_owned_by("alice");
        let acl = TableAclManager::new(&store, "t1", CallerContext::new("alice"));
        acl.set_acl(Scope::DEFAULT, TableRole::Reader).expect("set");
        assert_eq!(store.read_table("t1").expect("t1").data_etag(), DataEtag(1));
    }

    #[test]
    fn readers_see_acls_but_cannot_change_them() {
        let store = store_owned_by("alice");
        TableAclManager::new(&store, "t1", CallerContext::new("alice"))
            .set_acl(Scope::DEFAULT, TableRole::Reader)
            .expect("set");
        let bob = TableAclManager::new(&store, "t1", CallerContext::new("bob"));
        assert_eq!(bob.get_acls(None).expect("read").len(), 2);
        let err = bob
            .set_acl(Scope::user("bob"), TableRole::Owner)
            .expect_err("escalation");
        assert_eq!(err.code(), TablesErrorCode::PermissionDenied);
        let err = bob.delete_acl(&Scope::DEFAULT).expect_err("delete");
        assert_eq!(err.code(), TablesErrorCode::PermissionDenied);
    }

    #[test]
    fn malformed_scopes_are_rejected() {
        let store = store_owned_by("alice");
        let acl = TableAclManager::new(&store, "t1", CallerContext::new("alice"));
        let err = acl
            .set_acl(Scope::user(""), TableRole::Reader)
            .expect_err("empty user");
        assert_eq!(err.code(), TablesErrorCode::InvalidArgument);
    }
}
