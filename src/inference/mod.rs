//! Semantic inference over a resolved generation.
//!
//! Classifiers are independent: each reads the model, symbol table and call
//! graph and writes facts of its own [`FactKind`] only. They run in parallel
//! and their results are merged afterwards, so no classifier can observe
//! another's output.

mod crud;
mod entry_points;
mod persistence;

pub use crud::{classify_method_name, CrudClassifier};
pub use entry_points::EntryPointClassifier;
pub use persistence::{persistent_types, PersistenceClassifier};

use std::collections::BTreeMap;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::callgraph::CallGraph;
use crate::config::InferenceConfig;
use crate::index::SymbolTable;
use crate::model::{AnalysisLevel, CanonicalModel, EntityId, TypeId};

/// Names accepted in `inference.disabled_classifiers`.
pub const CLASSIFIER_NAMES: &[&str] = &["crud", "entry_points", "persistent_entity"];

/// Persistence operation performed by a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudOperation {
    Create,
    Read,
    Update,
    Delete,
    /// Not a recognizable persistence call. A valid outcome, not an error.
    Unclassified,
}

impl CrudOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrudOperation::Create => "create",
            CrudOperation::Read => "read",
            CrudOperation::Update => "update",
            CrudOperation::Delete => "delete",
            CrudOperation::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for CrudOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CrudOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(CrudOperation::Create),
            "read" => Ok(CrudOperation::Read),
            "update" => Ok(CrudOperation::Update),
            "delete" => Ok(CrudOperation::Delete),
            "unclassified" => Ok(CrudOperation::Unclassified),
            other => Err(format!("unknown CRUD operation '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Crud,
    EntryPoint,
    PersistentEntity,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Crud => "crud",
            FactKind::EntryPoint => "entry_point",
            FactKind::PersistentEntity => "persistent_entity",
        }
    }
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A derived fact about one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum Fact {
    /// A call site's persistence operation and the entity type it acts on.
    Crud {
        operation: CrudOperation,
        entity: Option<TypeId>,
    },
    EntryPoint { reason: String },
    PersistentEntity { marker: String },
}

impl Fact {
    pub fn kind(&self) -> FactKind {
        match self {
            Fact::Crud { .. } => FactKind::Crud,
            Fact::EntryPoint { .. } => FactKind::EntryPoint,
            Fact::PersistentEntity { .. } => FactKind::PersistentEntity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactEntry {
    pub entity: EntityId,
    pub fact: Fact,
}

/// Facts of one generation, grouped by kind and ordered by entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DerivedFacts {
    tables: BTreeMap<FactKind, Vec<FactEntry>>,
    /// Classifiers that did not run, with the reason.
    skipped: Vec<(String, String)>,
}

impl DerivedFacts {
    /// The fact of `kind` recorded for `entity`.
    pub fn get(&self, entity: EntityId, kind: FactKind) -> Option<&Fact> {
        let entries = self.tables.get(&kind)?;
        entries
            .binary_search_by_key(&entity, |e| e.entity)
            .ok()
            .map(|i| &entries[i].fact)
    }

    pub fn of_kind(&self, kind: FactKind) -> &[FactEntry] {
        self.tables.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether a classifier produced facts of `kind`.
    pub fn has_kind(&self, kind: FactKind) -> bool {
        self.tables.contains_key(&kind)
    }

    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&mut self, kind: FactKind, mut entries: Vec<FactEntry>) {
        if self.tables.contains_key(&kind) {
            warn!(kind = %kind, "two classifiers wrote the same fact kind; keeping the first");
            return;
        }
        entries.retain(|e| e.fact.kind() == kind);
        entries.sort_by_key(|e| e.entity);
        entries.dedup_by_key(|e| e.entity);
        self.tables.insert(kind, entries);
    }
}

/// Read-only inputs shared by every classifier.
#[derive(Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub model: &'a CanonicalModel,
    pub table: &'a SymbolTable,
    pub graph: Option<&'a CallGraph>,
    pub config: &'a InferenceConfig,
}

/// A pattern-based fact producer.
pub trait Classifier: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &'static str;

    /// The only kind of fact this classifier writes.
    fn fact_kind(&self) -> FactKind;

    /// Lowest analysis level whose facts this classifier reads.
    fn required_level(&self) -> AnalysisLevel;

    /// Whether the generation holds the entities this classifier looks at.
    fn applicable(&self, _model: &CanonicalModel) -> bool {
        true
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> Vec<FactEntry>;
}

/// The built-in classifiers.
pub fn default_classifiers() -> Vec<Box<dyn Classifier>> {
    vec![
        Box::new(CrudClassifier),
        Box::new(EntryPointClassifier),
        Box::new(PersistenceClassifier),
    ]
}

/// Run the built-in classifiers over a generation built at `level`.
pub fn infer(input: &ClassifierInput<'_>, level: AnalysisLevel) -> DerivedFacts {
    run_classifiers(&default_classifiers(), input, level)
}

/// Run `classifiers` in parallel and merge their disjoint outputs.
pub fn run_classifiers(
    classifiers: &[Box<dyn Classifier>],
    input: &ClassifierInput<'_>,
    level: AnalysisLevel,
) -> DerivedFacts {
    let mut facts = DerivedFacts::default();
    let mut runnable = Vec::new();

    for classifier in classifiers {
        let reason = if input.config.is_disabled(classifier.name()) {
            Some("disabled by configuration".to_string())
        } else if !level.satisfies(classifier.required_level()) {
            Some(format!("requires {}", classifier.required_level()))
        } else if classifier.required_level() >= AnalysisLevel::CallGraph && input.graph.is_none() {
            Some("no call graph".to_string())
        } else if !classifier.applicable(input.model) {
            Some("no applicable entities".to_string())
        } else {
            None
        };
        match reason {
            Some(reason) => {
                debug!(classifier = classifier.name(), reason = %reason, "skipping classifier");
                facts.skipped.push((classifier.name().to_string(), reason));
            }
            None => runnable.push(classifier),
        }
    }

    let results: Vec<(FactKind, Vec<FactEntry>)> = runnable
        .par_iter()
        .map(|c| (c.fact_kind(), c.classify(input)))
        .collect();

    for (kind, entries) in results {
        facts.insert(kind, entries);
    }
    info!(
        facts = facts.len(),
        skipped = facts.skipped.len(),
        "inferred derived facts"
    );
    facts
}
