//! Source metadata catalog.
//!
//! Schema extraction from a live database happens outside this crate; the
//! extracted metadata arrives as a JSON or YAML document and is loaded into a
//! [`MetadataCatalog`], which every later phase reads through source references
//! (`schema.name`).

mod types;

pub use types::{Column, ForeignKey, ObjectKind, SourceObject};

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Extracted source metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataCatalog {
    /// Name of the source database, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Objects in extraction order.
    #[serde(default)]
    pub objects: Vec<SourceObject>,
}

impl MetadataCatalog {
    /// Create a catalog from already-extracted objects.
    pub fn new(objects: Vec<SourceObject>) -> Self {
        Self {
            database: None,
            objects,
        }
    }

    /// Load a catalog from a JSON or YAML file (chosen by extension).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        let catalog: Self = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        catalog.validate()?;
        debug!("Loaded {} source objects from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Check names are present and source references unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for object in &self.objects {
            if object.schema.trim().is_empty() || object.name.trim().is_empty() {
                return Err(MigrateError::Metadata(format!(
                    "object '{}' has an empty schema or name",
                    object.full_name()
                )));
            }
            if !seen.insert(object.full_name().to_lowercase()) {
                return Err(MigrateError::Metadata(format!(
                    "duplicate object '{}'",
                    object.full_name()
                )));
            }
            let mut columns = HashSet::new();
            for column in &object.columns {
                if !columns.insert(column.name.to_lowercase()) {
                    return Err(MigrateError::Metadata(format!(
                        "duplicate column '{}' in '{}'",
                        column.name,
                        object.full_name()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Look up an object by source reference (case-insensitive).
    pub fn get(&self, source_ref: &str) -> Option<&SourceObject> {
        self.objects
            .iter()
            .find(|o| o.full_name().eq_ignore_ascii_case(source_ref))
    }

    /// Restrict the catalog to one schema.
    pub fn retain_schema(&mut self, schema: &str) {
        self.objects.retain(|o| o.schema.eq_ignore_ascii_case(schema));
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Serialize as pretty JSON (the normalized form written by `extract`).
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const CATALOG_JSON: &str = r#"{
        "database": "sales",
        "objects": [
            {
                "schema": "dbo",
                "name": "customers",
                "description": "Customer master",
                "columns": [
                    {"name": "id", "data_type": "int", "is_nullable": false},
                    {"name": "email", "data_type": "nvarchar(255)"}
                ],
                "primary_key": ["id"]
            },
            {
                "schema": "dbo",
                "name": "orders",
                "kind": "table",
                "columns": [
                    {"name": "id", "data_type": "int", "is_nullable": false},
                    {"name": "customer_id", "data_type": "int", "is_nullable": false}
                ],
                "primary_key": ["id"],
                "foreign_keys": [
                    {"name": "fk_orders_customers", "columns": ["customer_id"],
                     "ref_schema": "dbo", "ref_table": "customers", "ref_columns": ["id"]}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_load_json_catalog() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(CATALOG_JSON.as_bytes()).unwrap();

        let catalog = MetadataCatalog::load(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.database.as_deref(), Some("sales"));

        let customers = catalog.get("DBO.Customers").unwrap();
        assert!(customers.has_pk());
        assert!(customers.column("EMAIL").unwrap().is_nullable);
        assert_eq!(customers.non_nullable_columns().count(), 1);

        let orders = catalog.get("dbo.orders").unwrap();
        assert!(orders.references(customers));
        assert!(!customers.references(orders));
    }

    #[test]
    fn test_load_yaml_catalog() {
        let yaml = r#"
objects:
  - schema: sales
    name: regions
    kind: view
    columns:
      - name: code
        data_type: char(2)
"#;
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let catalog = MetadataCatalog::load(file.path()).unwrap();
        let regions = catalog.get("sales.regions").unwrap();
        assert_eq!(regions.kind, ObjectKind::View);
        assert!(regions.columns[0].is_nullable);
    }

    #[test]
    fn test_duplicate_objects_rejected() {
        let object = SourceObject {
            schema: "dbo".into(),
            name: "a".into(),
            kind: ObjectKind::Table,
            description: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            definition: None,
        };
        let mut twin = object.clone();
        twin.name = "A".into();
        let catalog = MetadataCatalog::new(vec![object, twin]);
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn test_retain_schema() {
        let mut catalog: MetadataCatalog = serde_json::from_str(CATALOG_JSON).unwrap();
        catalog.retain_schema("other");
        assert!(catalog.is_empty());
    }
}
