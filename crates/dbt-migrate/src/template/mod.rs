//! Built-in template generator and repairer.
//!
//! Renders a staging model straight from source metadata: every column is
//! selected from the object's `source()`, and the properties document carries
//! descriptions plus `not_null`, `unique` and `relationships` tests derived
//! from the source constraints. Used when no external generator is wired in,
//! and as a deterministic repair step.

use crate::artifact::{Artifact, ColumnSpec, ModelProperties, ModelSpec};
use crate::capability::{Generator, Repairer};
use crate::config::ProjectConfig;
use crate::error::{MigrateError, Result};
use crate::source::{MetadataCatalog, SourceObject};
use async_trait::async_trait;
use serde_yaml::{Mapping, Value};
use std::sync::Arc;
use tracing::debug;

/// Renders models from the source catalog.
#[derive(Debug, Clone)]
pub struct TemplateGenerator {
    catalog: Arc<MetadataCatalog>,
    project: ProjectConfig,
}

impl TemplateGenerator {
    pub fn new(catalog: Arc<MetadataCatalog>, project: ProjectConfig) -> Self {
        Self { catalog, project }
    }

    /// Model name for a source object, e.g. `stg_customers`.
    pub fn model_name(&self, object_name: &str) -> String {
        format!("{}{}", self.project.model_prefix, object_name.to_lowercase())
    }

    fn lookup(&self, capability: &str, source_ref: &str) -> Result<&SourceObject> {
        self.catalog.get(source_ref).ok_or_else(|| {
            MigrateError::capability(capability, source_ref, "unknown source object")
        })
    }

    /// Render the artifact for `object`.
    pub fn render(&self, object: &SourceObject) -> Result<Artifact> {
        let model = self.model_name(&object.name);
        let reference = format!("{}/{}.sql", self.project.models_dir.trim_end_matches('/'), model);

        let columns = if object.columns.is_empty() {
            "    *".to_string()
        } else {
            object
                .columns
                .iter()
                .map(|c| format!("    {}", quote_ident(&c.name)))
                .collect::<Vec<_>>()
                .join(",\n")
        };
        let sql = format!(
            "{{{{ config(materialized='{}') }}}}\n\nselect\n{}\nfrom {{{{ source('{}', '{}') }}}}\n",
            self.project.materialization.as_str(),
            columns,
            object.schema,
            object.name
        );

        let properties = ModelProperties {
            version: Some(2),
            models: vec![self.model_spec(object, model)],
        };
        let yaml = serde_yaml::to_string(&properties)?;

        debug!("Rendered template for {} at {}", object.full_name(), reference);
        Ok(Artifact::new(reference, sql).with_properties(yaml))
    }

    fn model_spec(&self, object: &SourceObject, model: String) -> ModelSpec {
        let description = object
            .description
            .clone()
            .unwrap_or_else(|| format!("Staging model for {} {}", object.kind, object.full_name()));

        let columns = object
            .columns
            .iter()
            .map(|column| {
                let mut tests = Vec::new();
                if !column.is_nullable {
                    tests.push(Value::String("not_null".into()));
                }
                if object
                    .primary_key
                    .iter()
                    .any(|pk| pk.eq_ignore_ascii_case(&column.name))
                {
                    tests.push(Value::String("unique".into()));
                }
                for fk in object.foreign_keys.iter().filter(|fk| {
                    fk.columns
                        .first()
                        .map(|c| c.eq_ignore_ascii_case(&column.name))
                        .unwrap_or(false)
                }) {
                    let mut args = Mapping::new();
                    args.insert(
                        Value::String("to".into()),
                        Value::String(format!("ref('{}')", self.model_name(&fk.ref_table))),
                    );
                    let field = fk
                        .ref_columns
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "id".to_string());
                    args.insert(Value::String("field".into()), Value::String(field));
                    let mut test = Mapping::new();
                    test.insert(Value::String("relationships".into()), Value::Mapping(args));
                    tests.push(Value::Mapping(test));
                }

                ColumnSpec {
                    name: column.name.clone(),
                    description: Some(
                        column
                            .description
                            .clone()
                            .unwrap_or_else(|| format!("{} ({})", column.name, column.data_type)),
                    ),
                    tests,
                    data_tests: Vec::new(),
                }
            })
            .collect();

        ModelSpec {
            name: model,
            description: Some(description),
            columns,
        }
    }
}

#[async_trait]
impl Generator for TemplateGenerator {
    async fn generate(&self, source_ref: &str, _prior_errors: &[String]) -> Result<Artifact> {
        let object = self.lookup("generator", source_ref)?;
        self.render(object)
    }
}

/// Repairs by re-rendering the template, which restores any dropped columns
/// and tests.
#[derive(Debug, Clone)]
pub struct TemplateRepairer {
    generator: TemplateGenerator,
}

impl TemplateRepairer {
    pub fn new(generator: TemplateGenerator) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Repairer for TemplateRepairer {
    async fn repair(
        &self,
        source_ref: &str,
        _artifact: &Artifact,
        failure_details: &[String],
    ) -> Result<Artifact> {
        debug!(
            "Re-rendering {} to repair {} failure(s)",
            source_ref,
            failure_details.len()
        );
        let object = self.generator.lookup("repairer", source_ref)?;
        self.generator.render(object)
    }
}

/// Quote an identifier unless it is a plain lowercase-safe name.
fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
