use crate::error::TablesError;
use crate::permission::{CallerContext, Scope, TablePermission};
use crate::storage::table_state::TableState;
use std::collections::BTreeSet;

/// A caller's effective permissions on one table, resolved from the table's
/// ACL entries at construction time.
///
/// Every ACL entry whose scope matches the caller (their USER scope, any of
/// their GROUP scopes, or DEFAULT) contributes its role's permissions; the
/// result is the union.
#[derive(Debug, Clone)]
pub struct AuthFilter {
    table_id: String,
    caller_id: String,
    scopes: Vec<Scope>,
    permissions: BTreeSet<TablePermission>,
}

impl AuthFilter {
    pub fn new(caller: &CallerContext, state: &TableState) -> Self {
        let scopes = caller.scopes();
        let permissions = scopes
            .iter()
            .filter_map(|scope| state.acls.get(scope))
            .flat_map(|role| role.permissions().iter().copied())
            .collect();
        Self {
            table_id: state.table_id().to_string(),
            caller_id: caller.display_id().to_string(),
            scopes,
            permissions,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn has_permission(&self, permission: TablePermission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn check_permission(&self, permission: TablePermission) -> Result<(), TablesError> {
        if self.has_permission(permission) {
            return Ok(());
        }
        Err(TablesError::PermissionDenied(format!(
            "{} lacks {permission:?} on table '{}'",
            self.caller_id, self.table_id
        )))
    }

    /// Whether `scope` is one the caller belongs to.
    pub fn in_scope(&self, scope: &Scope) -> bool {
        self.scopes.contains(scope)
    }

    /// Row-level check: holders of `unfiltered` pass for any row, everyone
    /// else only for rows in one of their own scopes.
    pub fn check_filter(
        &self,
        unfiltered: TablePermission,
        row_id: &str,
        scope: &Scope,
    ) -> Result<(), TablesError> {
        if self.passes_filter(unfiltered, scope) {
            return Ok(());
        }
        Err(TablesError::PermissionDenied(format!(
            "{} may not access row '{row_id}' in scope {scope} of table '{}'",
            self.caller_id, self.table_id
        )))
    }

    pub fn passes_filter(&self, unfiltered: TablePermission, scope: &Scope) -> bool {
        self.has_permission(unfiltered) || self.in_scope(scope)
    }

    /// Read visibility of a row in `scope`.
    pub fn can_read(&self, scope: &Scope) -> bool {
        self.passes_filter(TablePermission::UnfilteredRead, scope)
    }

    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn effective_permissions(&self) -> &BTreeSet<TablePermission> {
        &self.permissions
    }
}
