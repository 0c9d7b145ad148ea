use crate::error::TablesError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Discriminant of a [`Scope`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeType {
    Default,
    User,
    Group,
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeType::Default => write!(f, "DEFAULT"),
            ScopeType::User => write!(f, "USER"),
            ScopeType::Group => write!(f, "GROUP"),
        }
    }
}

/// Who a row is visible to, or who an ACL entry applies to.
///
/// `Default` carries no value. `User` and `Group` name exactly one principal.
/// The derived ordering (default < user < group, then by value) lets scopes key
/// ordered maps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope {
    pub scope_type: ScopeType,
    #[serde(default)]
    pub value: Option<String>,
}

impl Scope {
    pub const DEFAULT: Scope = Scope {
        scope_type: ScopeType::Default,
        value: None,
    };

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::User,
            value: Some(user_id.into()),
        }
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Group,
            value: Some(group_id.into()),
        }
    }

    pub fn is_default(&self) -> bool {
        self.scope_type == ScopeType::Default
    }

    pub fn validate(&self) -> Result<(), TablesError> {
        match (self.scope_type, self.value.as_deref()) {
            (ScopeType::Default, None) => Ok(()),
            (ScopeType::Default, Some(_)) => Err(TablesError::InvalidArgument(
                "DEFAULT scope must not carry a value".into(),
            )),
            (_, Some(v)) if !v.trim().is_empty() => Ok(()),
            (t, _) => Err(TablesError::InvalidArgument(format!(
                "{t} scope requires a non-empty value"
            ))),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}:{}", self.scope_type, v),
            None => write!(f, "{}", self.scope_type),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TablePermission {
    ReadRow,
    WriteRow,
    DeleteRow,
    UnfilteredRead,
    UnfilteredWrite,
    UnfilteredDelete,
    ReadAcl,
    WriteAcl,
    DeleteAcl,
    ReadProperties,
    WriteProperties,
    ReadTableEntry,
    DeleteTable,
}

impl TablePermission {
    pub const ALL: [TablePermission; 13] = [
        TablePermission::ReadRow,
        TablePermission::WriteRow,
        TablePermission::DeleteRow,
        TablePermission::UnfilteredRead,
        TablePermission::UnfilteredWrite,
        TablePermission::UnfilteredDelete,
        TablePermission::ReadAcl,
        TablePermission::WriteAcl,
        TablePermission::DeleteAcl,
        TablePermission::ReadProperties,
        TablePermission::WriteProperties,
        TablePermission::ReadTableEntry,
        TablePermission::DeleteTable,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableRole {
    None,
    FilteredWriter,
    UnfilteredReaderFilteredWriter,
    Reader,
    Writer,
    Owner,
}

impl TableRole {
    /// The one authoritative role -> permission table. Every authorization
    /// decision in the crate goes through this mapping.
    pub fn permissions(self) -> &'static [TablePermission] {
        use TablePermission::*;
        match self {
            TableRole::None => &[],
            TableRole::Reader => &[ReadRow, ReadAcl, ReadProperties, ReadTableEntry],
            TableRole::FilteredWriter => &[ReadRow, WriteRow, ReadProperties, ReadTableEntry],
            TableRole::UnfilteredReaderFilteredWriter => &[
                ReadRow,
                UnfilteredRead,
                WriteRow,
                ReadProperties,
                ReadTableEntry,
            ],
            TableRole::Writer => &[
                ReadRow,
                UnfilteredRead,
                WriteRow,
                UnfilteredWrite,
                DeleteRow,
                UnfilteredDelete,
                ReadProperties,
                WriteProperties,
                ReadTableEntry,
            ],
            TableRole::Owner => &TablePermission::ALL,
        }
    }

    pub fn grants(self, permission: TablePermission) -> bool {
        self.permissions().contains(&permission)
    }
}

/// Identity of the caller as established by the outer authentication layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CallerContext {
    /// `None` for an unauthenticated caller.
    pub user_id: Option<String>,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            groups: BTreeSet::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Name used in log lines and denial messages.
    pub fn display_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("anonymous")
    }

    /// The caller's own USER scope, each GROUP scope, and DEFAULT.
    pub fn scopes(&self) -> Vec<Scope> {
        let mut scopes = Vec::with_capacity(self.groups.len() + 2);
        if let Some(user) = &self.user_id {
            scopes.push(Scope::user(user.clone()));
        }
        scopes.extend(self.groups.iter().map(|g| Scope::group(g.clone())));
        scopes.push(Scope::DEFAULT);
        scopes
    }

    pub fn in_scope(&self, scope: &Scope) -> bool {
        match scope.scope_type {
            ScopeType::Default => true,
            ScopeType::User => {
                scope.value.is_some() && scope.value.as_deref() == self.user_id.as_deref()
            }
            ScopeType::Group => scope
                .value
                .as_ref()
                .is_some_and(|group| self.groups.contains(group)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CallerContext, Scope, ScopeType, TablePermission, TableRole};

    #[test]
    fn owner_holds_every_permission() {
        for p in TablePermission::ALL {
            assert!(TableRole::Owner.grants(p), "owner missing {p:?}");
        }
        assert!(TableRole::None.permissions().is_empty());
    }

    #[test]
    fn filtered_roles_lack_unfiltered_variants() {
        assert!(!TableRole::Reader.grants(TablePermission::UnfilteredRead));
        assert!(!TableRole::FilteredWriter.grants(TablePermission::UnfilteredWrite));
        assert!(!TableRole::FilteredWriter.grants(TablePermission::DeleteRow));
        assert!(TableRole::UnfilteredReaderFilteredWriter.grants(TablePermission::UnfilteredRead));
        assert!(!TableRole::UnfilteredReaderFilteredWriter.grants(TablePermission::UnfilteredWrite));
        assert!(!TableRole::Writer.grants(TablePermission::WriteAcl));
        assert!(TableRole::Reader.grants(TablePermission::ReadAcl));
    }

    #[test]
    fn caller_scopes_include_user_groups_and_default() {
        let caller = CallerContext::new("alice").with_group("field").with_group("admins");
        let scopes = caller.scopes();
        assert_eq!(scopes.first(), Some(&Scope::user("alice")));
        assert!(scopes.contains(&Scope::group("field")));
        assert!(scopes.contains(&Scope::group("admins")));
        assert_eq!(scopes.last(), Some(&Scope::DEFAULT));

        assert!(caller.in_scope(&Scope::DEFAULT));
        assert!(caller.in_scope(&Scope::group("field")));
        assert!(!caller.in_scope(&Scope::user("bob")));
        assert!(!caller.in_scope(&Scope::group("ops")));
    }

    #[test]
    fn anonymous_caller_only_sees_default() {
        let anon = CallerContext::anonymous();
        assert!(!anon.is_authenticated());
        assert_eq!(anon.scopes(), vec![Scope::DEFAULT]);
        let valueless_user = Scope {
            scope_type: ScopeType::User,
            value: None,
        };
        assert!(!anon.in_scope(&valueless_user));
    }

    #[test]
    fn scope_validation() {
        Scope::DEFAULT.validate().expect("default");
        Scope::user("bob").validate().expect("user");
        assert!(Scope::user("  ").validate().is_err());
        assert!(
            Scope {
                scope_type: ScopeType::Default,
                value: Some("x".into()),
            }
            .validate()
            .is_err()
        );
        assert_eq!(Scope::group("g1").to_string(), "GROUP:g1");
    }
}
