use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    DateTime,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Role a table plays for the syncing clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SchemaType {
    #[default]
    Data,
    Security,
    Shortcut,
}

/// Everything a caller supplies to create a table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDefinition {
    pub table_key: String,
    #[serde(default)]
    pub schema_type: SchemaType,
    pub columns: Vec<ColumnDef>,
}

impl TableDefinition {
    pub fn new(table_key: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table_key: table_key.into(),
            schema_type: SchemaType::Data,
            columns,
        }
    }

    pub fn with_schema_type(mut self, schema_type: SchemaType) -> Self {
        self.schema_type = schema_type;
        self
    }
}
