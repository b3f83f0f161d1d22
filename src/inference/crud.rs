//! CRUD classification of calls on persistent entities.
//!
//! Only call sites resolved to a member of a persistent type are
//! classified. Everything else, including unresolved sites, is recorded as
//! `Unclassified` instead of guessed.

use lazy_static::lazy_static;
use phf::phf_map;
use regex::Regex;

use super::{persistent_types, Classifier, ClassifierInput, CrudOperation, Fact, FactEntry, FactKind};
use crate::model::{AnalysisLevel, CanonicalModel, EntityId};

/// Framework marker methods (JPA `EntityManager`, Spring Data repositories,
/// Hibernate sessions, Django/SQLAlchemy managers).
static MARKER_METHODS: phf::Map<&'static str, CrudOperation> = phf_map! {
    "persist" => CrudOperation::Create,
    "save" => CrudOperation::Create,
    "saveAll" => CrudOperation::Create,
    "saveAndFlush" => CrudOperation::Create,
    "insert" => CrudOperation::Create,
    "create" => CrudOperation::Create,
    "add" => CrudOperation::Create,
    "find" => CrudOperation::Read,
    "findAll" => CrudOperation::Read,
    "findById" => CrudOperation::Read,
    "getReferenceById" => CrudOperation::Read,
    "get" => CrudOperation::Read,
    "count" => CrudOperation::Read,
    "exists" => CrudOperation::Read,
    "existsById" => CrudOperation::Read,
    "query" => CrudOperation::Read,
    "select" => CrudOperation::Read,
    "load" => CrudOperation::Read,
    "refresh" => CrudOperation::Read,
    "merge" => CrudOperation::Update,
    "update" => CrudOperation::Update,
    "flush" => CrudOperation::Update,
    "remove" => CrudOperation::Delete,
    "delete" => CrudOperation::Delete,
    "deleteAll" => CrudOperation::Delete,
    "deleteById" => CrudOperation::Delete,
    "deleteInBatch" => CrudOperation::Delete,
};

lazy_static! {
    /// Method-name prefixes, matched when no marker applies. The prefix must
    /// end at a word boundary: `findByName`, `find_by_name`, not `finder`.
    static ref PREFIX_PATTERNS: Vec<(Regex, CrudOperation)> = vec![
        (
            Regex::new(r"^(find|get|read|query|count|exists|search|select|load|fetch)([A-Z_0-9]|$)").unwrap(),
            CrudOperation::Read,
        ),
        (
            Regex::new(r"^(save|insert|create|add|persist|store)([A-Z_0-9]|$)").unwrap(),
            CrudOperation::Create,
        ),
        (
            Regex::new(r"^(update|merge|modify|set)([A-Z_0-9]|$)").unwrap(),
            CrudOperation::Update,
        ),
        (
            Regex::new(r"^(delete|remove|purge|erase)([A-Z_0-9]|$)").unwrap(),
            CrudOperation::Delete,
        ),
    ];
}

/// Classify a method name: configured overrides, then markers, then prefixes.
pub fn classify_method_name(
    name: &str,
    overrides: &std::collections::BTreeMap<String, CrudOperation>,
) -> CrudOperation {
    if let Some(op) = overrides.get(name) {
        return *op;
    }
    if let Some(op) = MARKER_METHODS.get(name) {
        return *op;
    }
    PREFIX_PATTERNS
        .iter()
        .find(|(pattern, _)| pattern.is_match(name))
        .map(|(_, op)| *op)
        .unwrap_or(CrudOperation::Unclassified)
}

pub struct CrudClassifier;

impl Classifier for CrudClassifier {
    fn name(&self) -> &'static str {
        "crud"
    }

    fn fact_kind(&self) -> FactKind {
        FactKind::Crud
    }

    fn required_level(&self) -> AnalysisLevel {
        AnalysisLevel::CallGraph
    }

    fn applicable(&self, model: &CanonicalModel) -> bool {
        !model.call_sites.is_empty()
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> Vec<FactEntry> {
        let Some(graph) = input.graph else {
            return Vec::new();
        };
        let persistent = persistent_types(input.model, input.table, input.config);

        graph
            .edges()
            .iter()
            .map(|edge| {
                let target = edge
                    .target
                    .callable()
                    .and_then(|id| input.model.callable(id));
                let entity = target
                    .and_then(|c| c.owner)
                    .map(|owner| input.table.canonical(owner))
                    .filter(|owner| persistent.contains_key(owner));
                let operation = match (entity, input.model.call_site(edge.call_site)) {
                    (Some(_), Some(site)) => {
                        classify_method_name(&site.guess.method_name, &input.config.crud_overrides)
                    }
                    _ => CrudOperation::Unclassified,
                };
                FactEntry {
                    entity: EntityId::CallSite(edge.call_site),
                    fact: Fact::Crud {
                        operation,
                        entity: entity.filter(|_| operation != CrudOperation::Unclassified),
                    },
                }
            })
            .collect()
    }
}
