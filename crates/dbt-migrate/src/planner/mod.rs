//! Assessment and planning.
//!
//! [`CatalogAssessor`] is the built-in assessment capability: it filters the
//! source catalog with include/exclude wildcards and orders the remaining
//! objects so that every foreign-key target is planned before its dependants.

use crate::capability::Assessor;
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::source::{MetadataCatalog, ObjectKind, SourceObject};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, warn};
use wildmatch::WildMatch;

/// One object in planned execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedObject {
    pub name: String,
    pub source_ref: String,
    #[serde(default)]
    pub kind: ObjectKind,
}

impl PlannedObject {
    pub fn from_source(object: &SourceObject) -> Self {
        Self {
            name: object.name.clone(),
            source_ref: object.full_name(),
            kind: object.kind,
        }
    }
}

/// Ordered output of the assessment capability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub objects: Vec<PlannedObject>,

    /// Non-fatal findings (dependency cycles, filtered-out references).
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn new(objects: Vec<PlannedObject>) -> Self {
        Self {
            objects,
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Wildcard filter over `schema.name` references.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    include: Vec<WildMatch>,
    exclude: Vec<WildMatch>,
}

impl ObjectFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let compile = |patterns: &[String]| -> Vec<WildMatch> {
            patterns
                .iter()
                .map(|p| WildMatch::new(&p.to_lowercase()))
                .collect()
        };
        Self {
            include: compile(include),
            exclude: compile(exclude),
        }
    }

    /// An empty include list admits everything; exclusion wins over inclusion.
    /// Patterns without a dot match the bare object name too.
    pub fn admits(&self, object: &SourceObject) -> bool {
        let full = object.full_name().to_lowercase();
        let bare = object.name.to_lowercase();
        let hit = |m: &WildMatch| m.matches(&full) || m.matches(&bare);

        let included = self.include.is_empty() || self.include.iter().any(hit);
        included && !self.exclude.iter().any(hit)
    }
}

/// Default assessment capability over an in-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogAssessor {
    filter: ObjectFilter,
}

impl CatalogAssessor {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            filter: ObjectFilter::new(&config.include_objects, &config.exclude_objects),
        }
    }

    pub fn with_filter(filter: ObjectFilter) -> Self {
        Self { filter }
    }

    /// Synchronous planning, shared by the async capability and `extract`.
    pub fn plan(&self, catalog: &MetadataCatalog) -> Plan {
        let selected: Vec<&SourceObject> = catalog
            .objects
            .iter()
            .filter(|o| self.filter.admits(o))
            .collect();
        debug!(
            "{} of {} objects selected for planning",
            selected.len(),
            catalog.len()
        );

        let (order, cyclic) = dependency_order(&selected);
        let mut plan = Plan::new(
            order
                .into_iter()
                .map(|i| PlannedObject::from_source(selected[i]))
                .collect(),
        );
        if !cyclic.is_empty() {
            let names: Vec<String> = cyclic.iter().map(|&i| selected[i].full_name()).collect();
            let message = format!("foreign key cycle between: {}", names.join(", "));
            warn!("{}", message);
            plan.warnings.push(message);
        }
        plan
    }
}

#[async_trait]
impl Assessor for CatalogAssessor {
    async fn assess(&self, catalog: &MetadataCatalog) -> Result<Plan> {
        let plan = self.plan(catalog);
        info!("Planned {} objects", plan.len());
        Ok(plan)
    }
}

/// Stable topological order of `objects` by foreign key.
///
/// Returns the execution order (indices into `objects`) and the subset of
/// indices that sat on a cycle. Ready objects are always taken lowest index
/// first; cyclic objects follow every acyclic one in their original order.
/// Self references and references outside `objects` are ignored.
fn dependency_order(objects: &[&SourceObject]) -> (Vec<usize>, Vec<usize>) {
    let index: HashMap<String, usize> = objects
        .iter()
        .enumerate()
        .map(|(i, o)| (o.full_name().to_lowercase(), i))
        .collect();

    let mut dependants: Vec<Vec<usize>> = vec![Vec::new(); objects.len()];
    let mut pending_deps = vec![0usize; objects.len()];

    for (i, object) in objects.iter().enumerate() {
        let mut targets = BTreeSet::new();
        for fk in &object.foreign_keys {
            let schema = if fk.ref_schema.is_empty() {
                &object.schema
            } else {
                &fk.ref_schema
            };
            let key = format!("{}.{}", schema, fk.ref_table).to_lowercase();
            if let Some(&target) = index.get(&key) {
                if target != i {
                    targets.insert(target);
                }
            }
        }
        pending_deps[i] = targets.len();
        for target in targets {
            dependants[target].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..objects.len())
        .filter(|&i| pending_deps[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(objects.len());

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependant in &dependants[next] {
            pending_deps[dependant] -= 1;
            if pending_deps[dependant] == 0 {
                ready.insert(dependant);
            }
        }
    }

    let cyclic: Vec<usize> = (0..objects.len())
        .filter(|&i| pending_deps[i] > 0)
        .collect();
    order.extend(cyclic.iter().copied());
    (order, cyclic)
}
