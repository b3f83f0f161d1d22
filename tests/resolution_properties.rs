//! Property-based tests for call resolution.
//!
//! Resolution must not depend on input order, and overload ties must always
//! resolve to one declaration, preferring an exact parameter match.

use proptest::prelude::*;

use codemodel::callgraph::{self, CallTarget};
use codemodel::config::ResolutionConfig;
use codemodel::model::{
    CallSiteFragment, CallableFragment, CalleeGuess, Modifiers, Parameter, Signature, Span,
    TypeFragment, TypeKind, UnitFragment,
};
use codemodel::model::Strategy as ModelStrategy;
use codemodel::{CanonicalModel, Language, SymbolTable};

const TYPES: &[&str] = &["int", "long", "double", "String", "Object", "boolean"];

fn method(owner: usize, qn: &str, params: &[&str], sites: Vec<CallSiteFragment>) -> CallableFragment {
    CallableFragment {
        owner: Some(owner),
        name: qn.rsplit('.').next().unwrap_or(qn).to_string(),
        signature: Signature::new(qn, params.iter().map(|p| p.to_string()).collect()),
        return_type: None,
        parameters: params
            .iter()
            .map(|t| Parameter::new("p", Some(t.to_string()), 1))
            .collect(),
        modifiers: Modifiers::from_keywords(vec!["public".to_string()], false, true),
        annotations: vec![],
        start_line: 1,
        span: Span::default(),
        call_sites: sites,
    }
}

fn class(qn: &str) -> TypeFragment {
    TypeFragment {
        name: qn.rsplit('.').next().unwrap_or(qn).to_string(),
        qualified_name: qn.to_string(),
        kind: TypeKind::Class,
        supertypes: vec![],
        annotations: vec![],
        modifiers: vec![],
        fields: vec![],
        span: Span::default(),
        enclosing: None,
    }
}

/// `Store` declares `put(T)` for each overload type; `Client.run` calls `store.put(arg)`.
fn overload_model(overloads: &[&str], argument: &str) -> CanonicalModel {
    let mut unit = UnitFragment::new("app/Store.java", Language::Java);
    unit.package = Some("app".to_string());
    unit.types.push(class("app.Store"));
    unit.types.push(class("app.Client"));
    for t in overloads {
        unit.callables.push(method(0, "app.Store.put", &[*t], vec![]));
    }
    let site = CallSiteFragment {
        guess: CalleeGuess {
            method_name: "put".to_string(),
            receiver_expr: Some("store".to_string()),
            receiver_type: Some("Store".to_string()),
            argument_types: vec![Some(argument.to_string())],
            signature: None,
            is_constructor_call: false,
        },
        arguments: vec!["value".to_string()],
        line: 10,
        span: None,
    };
    unit.callables.push(method(1, "app.Client.run", &[], vec![site]));
    CanonicalModel::assemble(ModelStrategy::SyntaxTree, Language::Java, vec![unit])
}

fn distinct_types() -> impl Strategy<Value = Vec<&'static str>> {
    proptest::sample::subsequence(TYPES.to_vec(), 1..=TYPES.len()).prop_shuffle()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: an overloaded call always resolves, to the exact match when one exists.
    #[test]
    fn prop_overload_tie_break(overloads in distinct_types(), argument in proptest::sample::select(TYPES.to_vec())) {
        let model = overload_model(&overloads, argument);
        let table = SymbolTable::build(&model).unwrap();
        let graph = callgraph::resolve(&model, &table, &ResolutionConfig::default());

        let edge = &graph.edges()[0];
        let CallTarget::Resolved(target) = edge.target else {
            return Err(TestCaseError::fail("overloaded call left unresolved"));
        };
        let chosen = &model.callable(target).unwrap().signature.parameter_types[0];
        if overloads.contains(&argument) {
            prop_assert_eq!(chosen.as_str(), argument);
        }

        // Same input, same answer.
        let again = callgraph::resolve(&model, &table, &ResolutionConfig::default());
        prop_assert_eq!(&graph, &again);
    }
}

#[cfg(feature = "tree-sitter")]
mod python {
    use super::*;
    use codemodel::{AnalysisLevel, EngineConfig, Pipeline, SourceInput, SourceSet};

    /// Module `i` declares `Model{i}` and `helper{i}`, which calls `helper{targets[i]}`.
    fn modules(targets: &[usize]) -> Vec<SourceInput> {
        targets
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let source = format!(
                    "class Model{i}(Model):\n    def save(self):\n        pass\n\n\ndef helper{i}():\n    item = Model{i}()\n    item.save()\n    helper{target}()\n"
                );
                SourceInput::file(format!("pkg/mod{i}.py"), source)
            })
            .collect()
    }

    fn shuffled_modules() -> impl Strategy<Value = (Vec<SourceInput>, Vec<SourceInput>)> {
        (1..6usize)
            .prop_flat_map(|n| proptest::collection::vec(0..n, n))
            .prop_flat_map(|targets| {
                let inputs = modules(&targets);
                (Just(inputs.clone()), Just(inputs).prop_shuffle())
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// Property: listing order of inputs never changes the result.
        #[test]
        fn prop_build_ignores_input_order((ordered, shuffled) in shuffled_modules()) {
            let pipeline = Pipeline::with_config(EngineConfig::default());
            let a = pipeline
                .build(&SourceSet::new("pkg", Language::Python, ordered), AnalysisLevel::CallGraphInference)
                .unwrap();
            let b = pipeline
                .build(&SourceSet::new("pkg", Language::Python, shuffled), AnalysisLevel::CallGraphInference)
                .unwrap();

            prop_assert_eq!(&a.key, &b.key);
            prop_assert_eq!(&a.symbol_table, &b.symbol_table);
            prop_assert_eq!(&a.call_graph, &b.call_graph);
            prop_assert_eq!(&a.facts, &b.facts);

            // Every helper call and every save resolves.
            let stats = a.call_graph.as_ref().unwrap().stats();
            prop_assert_eq!(stats.resolved, 2 * a.model.units.len());
        }
    }
}
