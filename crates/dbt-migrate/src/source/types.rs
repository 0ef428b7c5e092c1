//! Schema and metadata types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of source schema object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    #[default]
    Table,
    View,
    Procedure,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Procedure => "procedure",
        })
    }
}

/// Source object metadata (table, view or procedure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceObject {
    /// Schema name.
    pub schema: String,

    /// Object name.
    pub name: String,

    /// Object kind.
    #[serde(default)]
    pub kind: ObjectKind,

    /// Business description, if documented in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Column definitions.
    #[serde(default)]
    pub columns: Vec<Column>,

    /// Primary key column names.
    #[serde(default)]
    pub primary_key: Vec<String>,

    /// Outgoing foreign key constraints.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,

    /// Procedure or view body, when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl SourceObject {
    /// Get the fully qualified object name, also used as its source reference.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Check if the object has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Look up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Columns declared NOT NULL.
    pub fn non_nullable_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_nullable)
    }

    /// Whether another object is referenced by one of this object's foreign keys.
    pub fn references(&self, other: &SourceObject) -> bool {
        self.foreign_keys.iter().any(|fk| fk.targets(other))
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "varchar", "datetime2").
    pub data_type: String,

    /// Whether the column allows NULL.
    #[serde(default = "default_nullable")]
    pub is_nullable: bool,

    /// Column description, if documented.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Maximum length for string/binary types (-1 for max).
    #[serde(default)]
    pub max_length: i32,

    /// Numeric precision.
    #[serde(default)]
    pub precision: i32,

    /// Numeric scale.
    #[serde(default)]
    pub scale: i32,
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    #[serde(default)]
    pub name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced schema name (defaults to the owning object's schema when empty).
    #[serde(default)]
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    #[serde(default)]
    pub ref_columns: Vec<String>,
}

impl ForeignKey {
    /// Whether this key points at `object`. An empty `ref_schema` matches any schema.
    pub fn targets(&self, object: &SourceObject) -> bool {
        self.ref_table.eq_ignore_ascii_case(&object.name)
            && (self.ref_schema.is_empty() || self.ref_schema.eq_ignore_ascii_case(&object.schema))
    }
}

fn default_nullable() -> bool {
    true
}
