//! Call site resolution.
//!
//! Each call site is resolved on its own against the symbol table, in this
//! order:
//!
//! 1. an exact qualified signature supplied by the producer;
//! 2. constructors of the named type, for constructor calls;
//! 3. members of the receiver's static type, walking the supertype chain
//!    breadth first so the nearest declaration shadows inherited ones;
//! 4. for bare calls, the enclosing type hierarchy, then free functions of
//!    the same unit, then any callable with the same simple name.
//!
//! Surviving overloads go through the configured tie-break. A site with no
//! candidate gets an `Unresolved` edge of kind `static`.

use tracing::{debug, info};

use super::graph::{CallEdge, CallGraph, CallTarget, EdgeKind, ResolutionStats};
use crate::config::{ResolutionConfig, TieBreak};
use crate::index::SymbolTable;
use crate::model::signature::{canonical, constructor_alias, normalize_type, parse_signature, simple_type};
use crate::model::{
    CallSite, Callable, CallableId, CanonicalModel, EntityId, Language, TypeId,
};

/// Resolves every call site of a model into a [`CallGraph`].
pub struct CallResolver<'a> {
    model: &'a CanonicalModel,
    table: &'a SymbolTable,
    tie_break: &'a [TieBreak],
}

/// Outcome for a single call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub target: CallTarget,
    pub kind: EdgeKind,
    /// More than one candidate reached the tie-break.
    pub ambiguous: bool,
}

impl Resolution {
    fn unresolved(ambiguous: bool) -> Self {
        Self {
            target: CallTarget::Unresolved,
            kind: EdgeKind::Static,
            ambiguous,
        }
    }
}

/// Resolve a whole model. Pure over `(model, table, config)`.
pub fn resolve(model: &CanonicalModel, table: &SymbolTable, config: &ResolutionConfig) -> CallGraph {
    CallResolver::new(model, table, config).build_graph()
}

impl<'a> CallResolver<'a> {
    pub fn new(model: &'a CanonicalModel, table: &'a SymbolTable, config: &'a ResolutionConfig) -> Self {
        Self {
            model,
            table,
            tie_break: &config.tie_break,
        }
    }

    pub fn build_graph(&self) -> CallGraph {
        let mut stats = ResolutionStats::default();
        let mut edges = Vec::with_capacity(self.model.call_sites.len());

        for site in &self.model.call_sites {
            let resolution = self.resolve_site(site);
            stats.total += 1;
            if resolution.target.is_resolved() {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            if resolution.ambiguous {
                stats.ambiguous += 1;
            }
            edges.push(CallEdge {
                call_site: site.id,
                source: site.caller,
                target: resolution.target,
                kind: resolution.kind,
            });
        }

        info!(
            total = stats.total,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            ambiguous = stats.ambiguous,
            "resolved call graph"
        );
        CallGraph::new(self.model.callables.len(), edges, stats)
    }

    /// Resolve one call site.
    pub fn resolve_site(&self, site: &CallSite) -> Resolution {
        let Some(caller) = self.model.callable(site.caller) else {
            return Resolution::unresolved(false);
        };
        let guess = &site.guess;

        if let Some(id) = guess.signature.as_deref().and_then(|s| self.exact_match(s)) {
            return self.resolved(id, false);
        }

        let candidates = if guess.is_constructor_call {
            self.constructor_candidates(site, caller)
        } else if guess.receiver_expr.is_some() || guess.receiver_type.is_some() {
            match self.receiver_type(site, caller) {
                Some(receiver) => self.hierarchy_candidates(receiver, site),
                // Receiver of unknown type: accept only an unambiguous name match.
                None if guess.receiver_type.is_none() => {
                    let global = self.global_candidates(site);
                    if global.len() > 1 {
                        debug!(site = %site.id, method = %guess.method_name, "ambiguous untyped receiver");
                        return Resolution::unresolved(true);
                    }
                    global
                }
                None => Vec::new(),
            }
        } else {
            self.bare_candidates(site, caller)
        };

        match candidates.len() {
            0 => Resolution::unresolved(false),
            1 => self.resolved(candidates[0], false),
            _ => self.resolved(self.break_tie(&candidates, site, caller), true),
        }
    }

    fn resolved(&self, id: CallableId, ambiguous: bool) -> Resolution {
        let kind = match self.model.callable(id) {
            Some(c) if c.modifiers.is_constructor => EdgeKind::Constructor,
            Some(c) if c.modifiers.is_static || c.owner.is_none() => EdgeKind::Static,
            Some(c) if !c.modifiers.is_virtual => EdgeKind::Static,
            _ => EdgeKind::VirtualDispatch,
        };
        Resolution {
            target: CallTarget::Resolved(id),
            kind,
            ambiguous,
        }
    }

    /// A producer-supplied signature matching exactly one declaration.
    fn exact_match(&self, signature: &str) -> Option<CallableId> {
        if let Some(id) = self.table.callable_by_key(signature) {
            return Some(id);
        }
        let (mut name, params) = parse_signature(signature)?;
        if let Some(alias) = constructor_alias(&name) {
            name = alias;
            if let Some(id) = self.table.callable_by_key(&canonical(&name, &params)) {
                return Some(id);
            }
        }
        // Tolerate producers that qualify parameter types differently.
        let wanted: Vec<String> = params.iter().map(|p| simple_type(p)).collect();
        let mut matching = self.table.overloads(&name).iter().copied().filter(|id| {
            self.model.callable(*id).is_some_and(|c| {
                let declared: Vec<String> =
                    c.signature.parameter_types.iter().map(|p| simple_type(p)).collect();
                declared == wanted
            })
        });
        match (matching.next(), matching.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    fn receiver_type(&self, site: &CallSite, caller: &Callable) -> Option<TypeId> {
        let name = site.guess.receiver_type.as_deref()?;
        self.table.resolve_type_name(self.model, name, caller.unit)
    }

    fn constructor_candidates(&self, site: &CallSite, caller: &Callable) -> Vec<CallableId> {
        let name = site
            .guess
            .receiver_type
            .as_deref()
            .unwrap_or(&site.guess.method_name);
        let Some(type_id) = self.table.resolve_type_name(self.model, name, caller.unit) else {
            return Vec::new();
        };
        // Python classes inherit `__init__`; Java and C constructors are not inherited.
        let inherits = self.model.language == Language::Python;
        let mut chain = vec![self.table.canonical(type_id)];
        if inherits {
            chain.extend(self.table.supertype_chain(type_id));
        }
        for ty in chain {
            let found: Vec<CallableId> = self
                .table
                .members_of(ty)
                .iter()
                .copied()
                .filter(|id| {
                    self.model
                        .callable(*id)
                        .is_some_and(|c| c.modifiers.is_constructor && c.accepts_arity(site.arity()))
                })
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    /// Members named like the call in `start` or its nearest supertype.
    fn hierarchy_candidates(&self, start: TypeId, site: &CallSite) -> Vec<CallableId> {
        let mut chain = vec![self.table.canonical(start)];
        chain.extend(self.table.supertype_chain(start));
        for ty in chain {
            let found = self.named_members(ty, site);
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    fn named_members(&self, ty: TypeId, site: &CallSite) -> Vec<CallableId> {
        self.table
            .members_of(ty)
            .iter()
            .copied()
            .filter(|id| self.matches_call(*id, site))
            .collect()
    }

    fn matches_call(&self, id: CallableId, site: &CallSite) -> bool {
        self.model.callable(id).is_some_and(|c| {
            c.name == site.guess.method_name
                && !c.modifiers.is_constructor
                && c.accepts_arity(site.arity())
        })
    }

    fn bare_candidates(&self, site: &CallSite, caller: &Callable) -> Vec<CallableId> {
        if let Some(owner) = caller.owner {
            let found = self.hierarchy_candidates(owner, site);
            if !found.is_empty() {
                return found;
            }
        }

        if let Some(unit) = self.model.unit(caller.unit) {
            let local: Vec<CallableId> = unit
                .callables
                .iter()
                .copied()
                .filter(|id| self.matches_call(*id, site))
                .collect();
            if !local.is_empty() {
                return local;
            }
        }

        self.global_candidates(site)
    }

    fn global_candidates(&self, site: &CallSite) -> Vec<CallableId> {
        self.table
            .find_by_simple_name(&site.guess.method_name)
            .into_iter()
            .filter_map(|id| match id {
                EntityId::Callable(c) => Some(c),
                _ => None,
            })
            .filter(|id| self.matches_call(*id, site))
            .collect()
    }

    /// Narrow candidates rule by rule; the lowest id wins what remains.
    fn break_tie(&self, candidates: &[CallableId], site: &CallSite, caller: &Callable) -> CallableId {
        let mut remaining: Vec<CallableId> = candidates.to_vec();
        remaining.sort();

        for rule in self.tie_break {
            let narrowed: Vec<CallableId> = match rule {
                TieBreak::ExactType => remaining
                    .iter()
                    .copied()
                    .filter(|id| self.arguments_match(*id, site, caller, false))
                    .collect(),
                TieBreak::AssignableType => remaining
                    .iter()
                    .copied()
                    .filter(|id| self.arguments_match(*id, site, caller, true))
                    .collect(),
                TieBreak::FirstDeclared => remaining.iter().copied().take(1).collect(),
            };
            if !narrowed.is_empty() {
                remaining = narrowed;
            }
            if remaining.len() == 1 {
                break;
            }
        }

        debug!(
            site = %site.id,
            method = %site.guess.method_name,
            candidates = candidates.len(),
            "broke overload tie"
        );
        remaining[0]
    }

    /// Whether every known argument type fits its parameter.
    ///
    /// At least one argument type must be known for the rule to apply.
    fn arguments_match(&self, id: CallableId, site: &CallSite, caller: &Callable, assignable: bool) -> bool {
        let Some(callable) = self.model.callable(id) else {
            return false;
        };
        let mut known = 0;
        for (i, arg) in site.guess.argument_types.iter().enumerate() {
            let Some(arg) = arg.as_deref() else {
                continue;
            };
            let Some(param) = parameter_type(callable, i) else {
                return false;
            };
            known += 1;
            let fits = if assignable {
                self.table.is_assignable(self.model, arg, &param, caller.unit)
            } else {
                simple_type(arg) == simple_type(&param)
            };
            if !fits {
                return false;
            }
        }
        known > 0
    }
}

/// Declared type of the `i`-th argument position, expanding variadics.
fn parameter_type(callable: &Callable, i: usize) -> Option<String> {
    let param = callable
        .parameters
        .get(i)
        .or_else(|| callable.parameters.last().filter(|p| p.is_variadic))?;
    let declared = param.key_type();
    if param.is_variadic {
        Some(declared.trim_end_matches("[]").to_string())
    } else if declared == crate::model::signature::UNKNOWN_TYPE {
        // Untyped parameters take anything.
        Some("object".to_string())
    } else {
        Some(normalize_type(&declared))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CallSiteFragment, CallableFragment, CalleeGuess, Modifiers, Parameter, Signature, Span,
        Strategy, TypeFragment, TypeKind, UnitFragment,
    };

    fn class(qn: &str, supertypes: &[&str]) -> TypeFragment {
        TypeFragment {
            name: crate::model::signature::simple_name(qn).to_string(),
            qualified_name: qn.to_string(),
            kind: TypeKind::Class,
            supertypes: supertypes.iter().map(|s| s.to_string()).collect(),
            annotations: vec![],
            modifiers: vec![],
            fields: vec![],
            span: Span::default(),
            enclosing: None,
        }
    }

    fn method(owner: Option<usize>, qn: &str, params: &[&str], keywords: &[&str]) -> CallableFragment {
        let parameters: Vec<Parameter> = params
            .iter()
            .enumerate()
            .map(|(i, t)| Parameter::new(format!("p{}", i), Some(t.to_string()), 1))
            .collect();
        let name = crate::model::signature::simple_name(qn).to_string();
        let is_constructor = owner.is_some() && qn.ends_with(&format!(".{0}.{0}", name)[..]);
        CallableFragment {
            owner,
            name,
            signature: Signature::new(qn, params.iter().map(|s| s.to_string()).collect()),
            return_type: None,
            parameters,
            modifiers: Modifiers::from_keywords(
                keywords.iter().map(|s| s.to_string()).collect(),
                is_constructor,
                owner.is_some(),
            ),
            annotations: vec![],
            start_line: 1,
            span: Span::default(),
            call_sites: vec![],
        }
    }

    fn call(method_name: &str, receiver: Option<&str>, receiver_type: Option<&str>, args: &[Option<&str>]) -> CallSiteFragment {
        CallSiteFragment {
            guess: CalleeGuess {
                method_name: method_name.to_string(),
                receiver_expr: receiver.map(str::to_string),
                receiver_type: receiver_type.map(str::to_string),
                argument_types: args.iter().map(|a| a.map(str::to_string)).collect(),
                signature: None,
                is_constructor_call: false,
            },
            arguments: args.iter().map(|_| "x".to_string()).collect(),
            line: 3,
            span: None,
        }
    }

    /// `shop.Base` <- `shop.Order`, plus a caller whose sites are `sites`.
    fn build(sites: Vec<CallSiteFragment>, config: &ResolutionConfig) -> (CanonicalModel, CallGraph) {
        let mut unit = UnitFragment::new("Shop.java", Language::Java);
        unit.package = Some("shop".to_string());
        unit.types.push(class("shop.Base", &[]));
        unit.types.push(class("shop.Order", &["Base"]));
        unit.types.push(class("shop.Service", &[]));
        unit.callables.push(method(Some(0), "shop.Base.touch", &[], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.save", &[], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.put", &["long"], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.put", &["Object"], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.put", &["int"], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.Order", &[], &["public"]));
        unit.callables.push(method(Some(1), "shop.Order.of", &["String"], &["public", "static"]));
        let mut process = method(Some(2), "shop.Service.process", &["Order"], &["public"]);
        process.call_sites = sites;
        unit.callables.push(process);

        let model = CanonicalModel::assemble(Strategy::SyntaxTree, Language::Java, vec![unit]);
        let table = SymbolTable::build(&model).unwrap();
        let graph = resolve(&model, &table, config);
        (model, graph)
    }

    fn target_name(model: &CanonicalModel, graph: &CallGraph, site: usize) -> Option<String> {
        graph.edges()[site]
            .target
            .callable()
            .and_then(|id| model.callable(id))
            .map(|c| c.signature.key())
    }

    #[test]
    fn test_receiver_type_and_supertype_chain() {
        let config = ResolutionConfig::default();
        let (model, graph) = build(
            vec![
                call("save", Some("order"), Some("Order"), &[]),
                call("touch", Some("order"), Some("Order"), &[]),
                call("of", Some("Order"), Some("Order"), &[Some("String")]),
            ],
            &config,
        );
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.save()"));
        assert_eq!(graph.edges()[0].kind, EdgeKind::VirtualDispatch);
        assert_eq!(target_name(&model, &graph, 1).as_deref(), Some("shop.Base.touch()"));
        assert_eq!(graph.edges()[2].kind, EdgeKind::Static);
    }

    #[test]
    fn test_unknown_name_is_unresolved() {
        let (_, graph) = build(vec![call("bar", Some("foo"), None, &[])], &ResolutionConfig::default());
        let edge = &graph.edges()[0];
        assert_eq!(edge.target, CallTarget::Unresolved);
        assert_eq!(edge.kind, EdgeKind::Static);
        assert_eq!(graph.stats().unresolved, 1);
    }

    #[test]
    fn test_external_receiver_type_is_unresolved() {
        let (_, graph) = build(
            vec![call("save", Some("name"), Some("String"), &[])],
            &ResolutionConfig::default(),
        );
        assert_eq!(graph.edges()[0].target, CallTarget::Unresolved);
    }

    #[test]
    fn test_constructor_call() {
        let mut site = call("Order", None, Some("Order"), &[]);
        site.guess.is_constructor_call = true;
        let (model, graph) = build(vec![site], &ResolutionConfig::default());
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.Order()"));
        assert_eq!(graph.edges()[0].kind, EdgeKind::Constructor);
    }

    #[test]
    fn test_exact_signature_guess() {
        let mut site = call("put", Some("order"), None, &[None]);
        site.guess.signature = Some("shop.Order.put(java.lang.Object)".to_string());
        let (model, graph) = build(vec![site], &ResolutionConfig::default());
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.put(Object)"));
        assert_eq!(graph.stats().ambiguous, 0);
    }

    #[test]
    fn test_init_guess_resolves_to_constructor() {
        let mut site = call("<init>", Some("x"), None, &[]);
        site.guess.signature = Some("shop.Order.<init>()".to_string());
        let (model, graph) = build(vec![site], &ResolutionConfig::default());
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.Order()"));
        assert_eq!(graph.edges()[0].kind, EdgeKind::Constructor);
    }

    #[test]
    fn test_typed_arguments_count_toward_arity() {
        let mut site = call("of", None, Some("Order"), &[Some("String")]);
        site.arguments.clear();
        let (model, graph) = build(vec![site], &ResolutionConfig::default());
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.of(String)"));
    }

    #[test]
    fn test_tie_break_order() {
        let sites = vec![
            call("put", Some("order"), Some("Order"), &[Some("int")]),
            call("put", Some("order"), Some("Order"), &[Some("short")]),
            call("put", Some("order"), Some("Order"), &[None]),
        ];

        let (model, graph) = build(sites.clone(), &ResolutionConfig::default());
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.put(int)"));
        // `short` is assignable to all three; the first declared wins.
        assert_eq!(target_name(&model, &graph, 1).as_deref(), Some("shop.Order.put(long)"));
        assert_eq!(target_name(&model, &graph, 2).as_deref(), Some("shop.Order.put(long)"));
        assert_eq!(graph.stats().ambiguous, 3);

        let first_only = ResolutionConfig {
            tie_break: vec![TieBreak::FirstDeclared],
        };
        let (model, graph) = build(sites, &first_only);
        assert_eq!(target_name(&model, &graph, 0).as_deref(), Some("shop.Order.put(long)"));
    }

    #[test]
    fn test_bare_call_uses_enclosing_hierarchy() {
        let mut unit = UnitFragment::new("util.py", Language::Python);
        unit.package = Some("util".to_string());
        unit.callables.push(method(None, "util.helper", &[], &[]));
        let mut main = method(None, "util.main", &[], &[]);
        main.call_sites = vec![call("helper", None, None, &[]), call("print", None, None, &[None])];
        unit.callables.push(main);

        let model = CanonicalModel::assemble(Strategy::SyntaxTree, Language::Python, vec![unit]);
        let table = SymbolTable::build(&model).unwrap();
        let graph = resolve(&model, &table, &ResolutionConfig::default());
        assert_eq!(graph.edges()[0].target, CallTarget::Resolved(CallableId(0)));
        assert_eq!(graph.edges()[0].kind, EdgeKind::Static);
        assert_eq!(graph.edges()[1].target, CallTarget::Unresolved);
    }
}
