//! Entry point detection.
//!
//! Callables become entry points through a language's `main` convention,
//! configured handler annotations, servlet handler overrides or web route
//! decorators. A type is an entry point when it carries a configured type
//! annotation or declares an entry-point callable.

use std::collections::BTreeMap;

use super::{Classifier, ClassifierInput, Fact, FactEntry, FactKind};
use crate::model::signature::simple_type;
use crate::model::{annotation_name, AnalysisLevel, Callable, EntityId, Language};

const SERVLET_HANDLERS: &[&str] = &[
    "doGet", "doPost", "doPut", "doDelete", "doHead", "doOptions", "service",
];

const SERVLET_SUPERTYPES: &[&str] = &["HttpServlet", "GenericServlet"];

/// Python decorator names registering a web route (`@app.route`, `@router.get`).
const ROUTE_DECORATORS: &[&str] = &["route", "get", "post", "put", "delete", "patch"];

pub struct EntryPointClassifier;

impl EntryPointClassifier {
    fn callable_reason(&self, input: &ClassifierInput<'_>, callable: &Callable) -> Option<String> {
        let config = input.config;
        match input.model.language {
            Language::Java => {
                let takes_args = callable.parameters.len() == 1
                    && simple_type(&callable.parameters[0].key_type()) == "String[]";
                if callable.name == "main" && callable.modifiers.is_static && takes_args {
                    return Some("main method".to_string());
                }
                if let Some(a) = callable
                    .annotations
                    .iter()
                    .find(|a| config.entry_point_annotations.iter().any(|e| e == annotation_name(a)))
                {
                    return Some(format!("@{}", annotation_name(a)));
                }
                if SERVLET_HANDLERS.contains(&callable.name.as_str()) && self.in_servlet(input, callable) {
                    return Some("servlet handler".to_string());
                }
                None
            }
            Language::Python => {
                if callable.name == "main" && callable.owner.is_none() {
                    return Some("main function".to_string());
                }
                callable
                    .annotations
                    .iter()
                    .map(|a| annotation_name(a))
                    .find(|name| {
                        ROUTE_DECORATORS.contains(name)
                            || config.entry_point_annotations.iter().any(|e| e == name)
                    })
                    .map(|name| format!("@{}", name))
            }
            Language::C => {
                (callable.name == "main" && callable.owner.is_none()).then(|| "main function".to_string())
            }
        }
    }

    /// Whether the callable's owner extends a servlet base, directly or through indexed types.
    fn in_servlet(&self, input: &ClassifierInput<'_>, callable: &Callable) -> bool {
        let Some(owner) = callable.owner else {
            return false;
        };
        let mut types = vec![owner];
        types.extend(input.table.supertype_chain(owner));
        types
            .into_iter()
            .filter_map(|id| input.model.type_decl(id))
            .flat_map(|t| t.supertypes.iter())
            .any(|s| SERVLET_SUPERTYPES.contains(&simple_type(s).as_str()))
    }
}

impl Classifier for EntryPointClassifier {
    fn name(&self) -> &'static str {
        "entry_points"
    }

    fn fact_kind(&self) -> FactKind {
        FactKind::EntryPoint
    }

    fn required_level(&self) -> AnalysisLevel {
        AnalysisLevel::SymbolTable
    }

    fn classify(&self, input: &ClassifierInput<'_>) -> Vec<FactEntry> {
        let mut entries = Vec::new();
        let mut types = BTreeMap::new();

        for callable in &input.model.callables {
            if let Some(reason) = self.callable_reason(input, callable) {
                if let Some(owner) = callable.owner {
                    types
                        .entry(input.table.canonical(owner))
                        .or_insert_with(|| format!("declares {}", callable.name));
                }
                entries.push(FactEntry {
                    entity: EntityId::Callable(callable.id),
                    fact: Fact::EntryPoint { reason },
                });
            }
        }

        for decl in &input.model.types {
            if let Some(a) = decl.annotations.iter().find(|a| {
                input
                    .config
                    .entry_point_type_annotations
                    .iter()
                    .any(|e| e == annotation_name(a))
            }) {
                // A type annotation outranks the method-derived reason.
                types.insert(input.table.canonical(decl.id), format!("@{}", annotation_name(a)));
            }
        }

        entries.extend(types.into_iter().map(|(id, reason)| FactEntry {
            entity: EntityId::Type(id),
            fact: Fact::EntryPoint { reason },
        }));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InferenceConfig;
    use crate::index::SymbolTable;
    use crate::model::{
        CallableFragment, CanonicalModel, Modifiers, Parameter, Signature, Span, Strategy,
        TypeFragment, TypeKind, UnitFragment,
    };

    fn class(qn: &str, supertypes: &[&str], annotations: &[&str]) -> TypeFragment {
        TypeFragment {
            name: crate::model::signature::simple_name(qn).to_string(),
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

    fn callable(
        owner: Option<usize>,
        qn: &str,
        params: &[&str],
        keywords: &[&str],
        annotations: &[&str],
    ) -> CallableFragment {
        CallableFragment {
            owner,
            name: crate::model::signature::simple_name(qn).to_string(),
            signature: Signature::new(qn, params.iter().map(|s| s.to_string()).collect()),
            return_type: None,
            parameters: params
                .iter()
                .map(|t| Parameter::new("p", Some(t.to_string()), 1))
                .collect(),
            modifiers: Modifiers::from_keywords(
                keywords.iter().map(|s| s.to_string()).collect(),
                false,
                owner.is_some(),
            ),
            annotations: annotations.iter().map(|s| s.to_string()).collect(),
            start_line: 1,
            span: Span::default(),
            call_sites: vec![],
        }
    }

    fn classify(language: Language, unit: UnitFragment) -> Vec<FactEntry> {
        let model = CanonicalModel::assemble(Strategy::SyntaxTree, language, vec![unit]);
        let table = SymbolTable::build(&model).unwrap();
        let config = InferenceConfig::default();
        let input = ClassifierInput {
            model: &model,
            table: &table,
            graph: None,
            config: &config,
        };
        EntryPointClassifier.classify(&input)
    }

    #[test]
    fn test_java_entry_points() {
        let mut unit = UnitFragment::new("App.java", Language::Java);
        unit.types.push(class("app.App", &[], &[]));
        unit.types.push(class("app.OrderServlet", &["HttpServlet"], &[]));
        unit.types.push(class("app.Api", &[], &["RestController"]));
        unit.callables.push(callable(Some(0), "app.App.main", &["String[]"], &["public", "static"], &[]));
        unit.callables.push(callable(Some(0), "app.App.main", &["int"], &["static"], &[]));
        unit.callables.push(callable(Some(1), "app.OrderServlet.doGet", &["Req", "Resp"], &["protected"], &[]));
        unit.callables.push(callable(Some(2), "app.Api.list", &[], &["public"], &["GetMapping(\"/orders\")"]));

        let entries = classify(Language::Java, unit);
        let reasons: Vec<(EntityId, String)> = entries
            .into_iter()
            .map(|e| match e.fact {
                Fact::EntryPoint { reason } => (e.entity, reason),
                other => panic!("unexpected fact {other:?}"),
            })
            .collect();

        use crate::model::{CallableId, TypeId};
        assert!(reasons.contains(&(EntityId::Callable(CallableId(0)), "main method".to_string())));
        assert!(!reasons.iter().any(|(id, _)| *id == EntityId::Callable(CallableId(1))));
        assert!(reasons.contains(&(EntityId::Callable(CallableId(2)), "servlet handler".to_string())));
        assert!(reasons.contains(&(EntityId::Callable(CallableId(3)), "@GetMapping".to_string())));
        assert!(reasons.contains(&(EntityId::Type(TypeId(0)), "declares main".to_string())));
        assert!(reasons.contains(&(EntityId::Type(TypeId(2)), "@RestController".to_string())));
    }

    #[test]
    fn test_python_routes_and_main() {
        let mut unit = UnitFragment::new("web.py", Language::Python);
        unit.callables.push(callable(None, "web.main", &[], &[], &[]));
        unit.callables.push(callable(None, "web.index", &[], &[], &["app.route('/')"]));
        unit.callables.push(callable(None, "web.helper", &[], &[], &["functools.cache"]));

        let entries = classify(Language::Python, unit);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].fact,
            Fact::EntryPoint {
                reason: "@route".to_string()
            }
        );
    }
}
