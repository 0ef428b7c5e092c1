//! Generated artifacts: one SQL model plus its properties document.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Component, Path, PathBuf};

/// A generated transformation-project artifact for one source object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Project-relative path of the model, e.g. `models/staging/stg_customers.sql`.
    pub reference: String,

    /// Model SQL.
    pub sql: String,

    /// Properties YAML (descriptions and tests), if produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<String>,
}

impl Artifact {
    pub fn new(reference: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            sql: sql.into(),
            properties: None,
        }
    }

    pub fn with_properties(mut self, properties: impl Into<String>) -> Self {
        self.properties = Some(properties.into());
        self
    }

    /// Full text as seen by the guardrail filter.
    pub fn text(&self) -> String {
        match &self.properties {
            Some(props) => format!("{}\n{}", self.sql, props),
            None => self.sql.clone(),
        }
    }

    /// Parse the properties document. Missing properties parse as empty.
    pub fn parse_properties(&self) -> Result<ModelProperties> {
        match &self.properties {
            Some(yaml) if !yaml.trim().is_empty() => ModelProperties::from_yaml(yaml),
            _ => Ok(ModelProperties::default()),
        }
    }

    /// Path of the properties file next to the model (`<stem>.yml`).
    pub fn properties_reference(&self) -> String {
        Path::new(&self.reference)
            .with_extension("yml")
            .to_string_lossy()
            .into_owned()
    }

    /// Write the model (and properties, when present) under `root`.
    ///
    /// Both paths must stay inside `root`: absolute paths, drive prefixes and
    /// `..` segments are rejected before anything is written.
    pub fn write_to(&self, root: &Path) -> Result<PathBuf> {
        let properties_reference = self.properties_reference();
        let model_path = root.join(confined(&self.reference)?);
        let properties_path = match &self.properties {
            Some(_) => Some(root.join(confined(&properties_reference)?)),
            None => None,
        };

        if let Some(parent) = model_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&model_path, &self.sql)?;
        if let (Some(path), Some(props)) = (properties_path, &self.properties) {
            std::fs::write(path, props)?;
        }
        Ok(model_path)
    }
}

/// `reference` as a path that cannot leave the directory it is joined to.
fn confined(reference: &str) -> Result<&Path> {
    let path = Path::new(reference);
    let mut named = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MigrateError::Validation(format!(
                    "artifact path {:?} escapes the project root",
                    reference
                )))
            }
        }
    }
    if !named {
        return Err(MigrateError::Validation(format!(
            "artifact path {:?} names no file",
            reference
        )));
    }
    Ok(path)
}

/// Parsed properties document (`models:` layout).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelProperties {
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub models: Vec<ModelSpec>,
}

/// One model entry of a properties document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
}

/// One column entry of a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_tests: Vec<Value>,
}

/// Kind of a generated column-level test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestKind {
    NotNull,
    Unique,
    Relationships,
    AcceptedValues,
    Other,
}

/// A column-level test extracted from the properties document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTest {
    pub kind: TestKind,
    /// `to:` argument of a relationships test.
    pub target: Option<String>,
    /// `field:` argument of a relationships test.
    pub field: Option<String>,
}

impl ModelProperties {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| MigrateError::Validation(format!("invalid properties document: {}", e)))
    }

    /// The model entry a validation run should look at: the only one, or the
    /// one whose name ends with the object name.
    pub fn model_for(&self, object_name: &str) -> Option<&ModelSpec> {
        if self.models.len() == 1 {
            return self.models.first();
        }
        let wanted = object_name.to_lowercase();
        self.models
            .iter()
            .find(|m| m.name.to_lowercase().ends_with(&wanted))
    }
}

impl ModelSpec {
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|c| c.name.trim_matches('"').eq_ignore_ascii_case(name))
    }

    pub fn has_any_column_test(&self) -> bool {
        self.columns.iter().any(|c| !c.column_tests().is_empty())
    }
}

impl ColumnSpec {
    pub fn has_description(&self) -> bool {
        self.description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
    }

    /// Tests declared under `tests:` and `data_tests:`.
    pub fn column_tests(&self) -> Vec<ColumnTest> {
        self.tests
            .iter()
            .chain(self.data_tests.iter())
            .filter_map(ColumnTest::from_value)
            .collect()
    }

    pub fn has_test(&self, kind: TestKind) -> bool {
        self.column_tests().iter().any(|t| t.kind == kind)
    }
}

impl ColumnTest {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => Some(Self {
                kind: TestKind::from_name(name),
                target: None,
                field: None,
            }),
            Value::Mapping(map) => {
                let (key, args) = map.iter().next()?;
                let kind = TestKind::from_name(key.as_str()?);
                let arg = |name: &str| {
                    args.get(name)
                        .or_else(|| args.get("arguments").and_then(|a| a.get(name)))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                };
                Some(Self {
                    kind,
                    target: arg("to"),
                    field: arg("field"),
                })
            }
            _ => None,
        }
    }

    /// Whether a relationships test names `object_name` in its `to:` argument,
    /// e.g. `ref('stg_customers')` or `source('dbo', 'customers')`.
    pub fn points_at(&self, object_name: &str) -> bool {
        let wanted = object_name.to_lowercase();
        self.target
            .as_deref()
            .map(|to| {
                to.to_lowercase()
                    .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .any(|token| !token.is_empty() && token.ends_with(&wanted))
            })
            .unwrap_or(false)
    }
}

impl TestKind {
    fn from_name(name: &str) -> Self {
        let bare = name.rsplit('.').next().unwrap_or(name);
        match bare.to_lowercase().as_str() {
            "not_null" => TestKind::NotNull,
            "unique" => TestKind::Unique,
            "relationships" => TestKind::Relationships,
            "accepted_values" => TestKind::AcceptedValues,
            _ => TestKind::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPS: &str = r#"
version: 2
models:
  - name: stg_orders
    description: Orders placed by customers
    columns:
      - name: id
        description: Order key
        tests:
          - not_null
          - unique
      - name: customer_id
        data_tests:
          - not_null
          - relationships:
              to: ref('stg_customers')
              field: id
      - name: status
        tests:
          - accepted_values:
              values: ['open', 'closed']
"#;

    #[test]
    fn test_parse_properties_and_tests() {
        let artifact = Artifact::new("models/staging/stg_orders.sql", "select 1")
            .with_properties(PROPS);
        let props = artifact.parse_properties().unwrap();
        let model = props.model_for("orders").unwrap();
        assert_eq!(model.columns.len(), 3);

        let id = model.column("ID").unwrap();
        assert!(id.has_description());
        assert!(id.has_test(TestKind::NotNull));
        assert!(id.has_test(TestKind::Unique));

        let fk = model.column("customer_id").unwrap();
        let rel = fk
            .column_tests()
            .into_iter()
            .find(|t| t.kind == TestKind::Relationships)
            .unwrap();
        assert!(rel.points_at("customers"));
        assert!(!rel.points_at("products"));
        assert_eq!(rel.field.as_deref(), Some("id"));

        assert!(model.column("status").unwrap().has_test(TestKind::AcceptedValues));
        assert!(model.has_any_column_test());
    }

    #[test]
    fn test_missing_properties_parse_empty() {
        let artifact = Artifact::new("models/a.sql", "select 1");
        assert!(artifact.parse_properties().unwrap().models.is_empty());
        assert_eq!(artifact.text(), "select 1");
    }

    #[test]
    fn test_properties_reference() {
        let artifact = Artifact::new("models/staging/stg_orders.sql", "select 1");
        assert_eq!(artifact.properties_reference(), "models/staging/stg_orders.yml");
    }

    #[test]
    fn test_write_to_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact::new("models/staging/stg_orders.sql", "select 1")
            .with_properties(PROPS);
        let path = artifact.write_to(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "select 1");
        assert!(dir.path().join("models/staging/stg_orders.yml").exists());
    }

    #[test]
    fn test_write_to_rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");

        for reference in ["../outside.sql", "models/../../outside.sql", "/tmp/outside.sql", "", "."] {
            let artifact = Artifact::new(reference, "select 1").with_properties(PROPS);
            let err = artifact.write_to(&root).unwrap_err();
            assert!(matches!(err, MigrateError::Validation(_)), "{}", reference);
        }
        assert!(!dir.path().join("outside.sql").exists());
        assert!(!root.exists());

        let artifact = Artifact::new("./models/stg_orders.sql", "select 1");
        assert!(artifact.write_to(&root).is_ok());
    }
}
