use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Table,
    Row,
    Acl,
    Checkpoint,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Table => write!(f, "table"),
            ResourceType::Row => write!(f, "row"),
            ResourceType::Acl => write!(f, "acl"),
            ResourceType::Checkpoint => write!(f, "checkpoint"),
        }
    }
}

/// Closed set of failure kinds that cross the service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TablesErrorCode {
    AccessDenied,
    PermissionDenied,
    EtagMismatch,
    BadColumnName,
    TableAlreadyExists,
    NotFound,
    InvalidArgument,
    TaskLockFailure,
    DatastoreFailure,
}

impl TablesErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TablesErrorCode::AccessDenied => "access_denied",
            TablesErrorCode::PermissionDenied => "permission_denied",
            TablesErrorCode::EtagMismatch => "etag_mismatch",
            TablesErrorCode::BadColumnName => "bad_column_name",
            TablesErrorCode::TableAlreadyExists => "table_already_exists",
            TablesErrorCode::NotFound => "not_found",
            TablesErrorCode::InvalidArgument => "invalid_argument",
            TablesErrorCode::TaskLockFailure => "task_lock_failure",
            TablesErrorCode::DatastoreFailure => "datastore_failure",
        }
    }

    /// Transient infrastructure failures. Nothing is ever partially committed,
    /// so the client may retry these with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TablesErrorCode::TaskLockFailure | TablesErrorCode::DatastoreFailure
        )
    }
}

#[derive(Debug, Error)]
pub enum TablesError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("etag mismatch on {resource}: supplied {supplied}, current {current}")]
    EtagMismatch {
        resource: String,
        supplied: String,
        current: String,
    },
    #[error("bad column name '{column}' for table '{table_id}'")]
    BadColumnName { table_id: String, column: String },
    #[error("table '{table_id}' already exists")]
    TableAlreadyExists { table_id: String },
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("task lock on table '{table_id}' not acquired within {waited_ms}ms")]
    TaskLockFailure { table_id: String, waited_ms: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("integrity error: {message}")]
    IntegrityError { message: String },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
}

impl TablesError {
    pub fn code(&self) -> TablesErrorCode {
        match self {
            TablesError::AccessDenied(_) => TablesErrorCode::AccessDenied,
            TablesError::PermissionDenied(_) => TablesErrorCode::PermissionDenied,
            TablesError::EtagMismatch { .. } => TablesErrorCode::EtagMismatch,
            TablesError::BadColumnName { .. } => TablesErrorCode::BadColumnName,
            TablesError::TableAlreadyExists { .. } => TablesErrorCode::TableAlreadyExists,
            TablesError::NotFound { .. } => TablesErrorCode::NotFound,
            TablesError::InvalidArgument(_) => TablesErrorCode::InvalidArgument,
            TablesError::TaskLockFailure { .. } => TablesErrorCode::TaskLockFailure,
            TablesError::Io(_)
            | TablesError::Encode(_)
            | TablesError::Decode(_)
            | TablesError::IntegrityError { .. }
            | TablesError::InvalidConfig { .. } => TablesErrorCode::DatastoreFailure,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    pub(crate) fn table_not_found(table_id: &str) -> Self {
        TablesError::NotFound {
            resource_type: ResourceType::Table,
            resource_id: table_id.to_string(),
        }
    }

    pub(crate) fn row_not_found(table_id: &str, row_id: &str) -> Self {
        TablesError::NotFound {
            resource_type: ResourceType::Row,
            resource_id: format!("{table_id}/{row_id}"),
        }
    }
}
