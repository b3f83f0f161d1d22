//! Persistent entity detection.

use std::collections::BTreeMap;

use super::{Classifier, ClassifierInput, Fact, FactEntry, FactKind};
use crate::config::InferenceConfig;
use crate::index::SymbolTable;
use crate::model::signature::simple_name;
use crate::model::{annotation_name, AnalysisLevel, CanonicalModel, EntityId, TypeDecl, TypeId};

/// Types tagged persistent, keyed by their indexed declaration, with the
/// marker that tagged them.
///
/// A type is persistent when it carries a persistence annotation, declares
/// a persistence supertype (`models.Model`, `Base`), or inherits from an
/// indexed type that is itself persistent.
pub fn persistent_types(
    model: &CanonicalModel,
    table: &SymbolTable,
    config: &InferenceConfig,
) -> BTreeMap<TypeId, String> {
    let direct: BTreeMap<TypeId, String> = model
        .types
        .iter()
        .filter_map(|decl| direct_marker(decl, config).map(|m| (table.canonical(decl.id), m)))
        .collect();

    let mut tagged = direct.clone();
    for decl in &model.types {
        let id = table.canonical(decl.id);
        if tagged.contains_key(&id) {
            continue;
        }
        if let Some(marker) = table
            .supertype_chain(id)
            .into_iter()
            .find_map(|sup| direct.get(&sup))
        {
            tagged.insert(id, marker.clone());
        }
    }
    tagged
}

fn direct_marker(decl: &TypeDecl, config: &InferenceConfig) -> Option<String> {
    if let Some(annotation) = decl
        .annotations
        .iter()
        .find(|a| config.persistence_annotations.iter().any(|p| p == annotation_name(a)))
    {
        return Some(format!("@{}", annotation_name(annotation)));
    }
    decl.supertypes
        .iter()
        .find(|s| {
            let name = simple_name(s.split('<').next().unwrap_or(s));
            config.persistence_supertypes.iter().any(|p| p == name)
        })
        .map(|s| format!("extends {}", s))
}

pub struct PersistenceClassifier;

impl Classifier for PersistenceClassifier {
    fn name(&self) -> &'static str {
        "persistent_entity"
    }

    fn fact_kind(&self) -> FactKind {
        FactKind::PersistentEntity
    }

    fn required_level(&self) -> AnalysisLevel {
        AnalysisLevel::SymbolTable
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> Vec<FactEntry> {
        persistent_types(input.model, input.table, input.config)
            .into_iter()
            .map(|(id, marker)| FactEntry {
                entity: EntityId::Type(id),
                fact: Fact::PersistentEntity { marker },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Language, Span, Strategy, TypeFragment, TypeKind, UnitFragment};

    fn class(qn: &str, supertypes: &[&str], annotations: &[&str]) -> TypeFragment {
        TypeFragment {
            name: simple_name(qn).to_string(),
            qualified_name: qn.to_string(),
            kind: TypeKind::Class,
            supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
            annotations: annotations.iter().map(|s| s.to_string()).collect(),
            modifiers: vec![],
            fields: vec![],
            span: Span::default(),
            enclosing: None,
        }
    }

    #[test]
    fn test_annotations_supertypes_and_inheritance() {
        let mut unit = UnitFragment::new("shop/models.py", Language::Python);
        unit.package = Some("shop.models".to_string());
        unit.types.push(class("shop.models.Order", &["models.Model"], &[]));
        unit.types.push(class("shop.models.Invoice", &[], &["Entity"]));
        unit.types.push(class("shop.models.RushOrder", &["Order"], &[]));
        unit.types.push(class("shop.models.Helper", &[], &["dataclass"]));

        let model = CanonicalModel::assemble(Strategy::SyntaxTree, Language::Python, vec![unit]);
        let table = SymbolTable::build(&model).unwrap();
        let tagged = persistent_types(&model, &table, &InferenceConfig::default());

        assert_eq!(tagged.get(&TypeId(0)).map(String::as_str), Some("extends models.Model"));
        assert_eq!(tagged.get(&TypeId(1)).map(String::as_str), Some("@Entity"));
        assert_eq!(tagged.get(&TypeId(2)).map(String::as_str), Some("extends models.Model"));
        assert!(!tagged.contains_key(&TypeId(3)));
    }
}
