//! Read-only queries over one published generation.
//!
//! A [`ModelQuery`] holds its generation by `Arc`, so answers stay
//! consistent even if the controller publishes a newer generation meanwhile.
//! Queries that need a stage the generation was not built with fail with
//! `UnsupportedLevel`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::callgraph::{CallGraph, CallTarget};
use crate::error::{AnalysisError, Result};
use crate::index::SymbolTable;
use crate::inference::{CrudOperation, DerivedFacts, Fact, FactKind};
use crate::model::signature;
use crate::model::{
    annotation_name, has_annotation, AnalysisLevel, CallSite, CallSiteId, Callable, CallableId,
    CanonicalModel, Comment, EntityId, Field, Language, TypeDecl, TypeId,
};
use crate::pipeline::AnalysisArtifact;

/// Annotations marking a JUnit test method.
const TEST_ANNOTATIONS: &[&str] = &["Test", "ParameterizedTest", "RepeatedTest", "TestFactory"];

/// A type with its resolved ancestry and descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeHierarchy {
    pub type_id: TypeId,
    pub qualified_name: String,
    /// Transitive supertypes, nearest first.
    pub supertypes: Vec<String>,
    /// Declared supertypes that are not part of the source set.
    pub external_supertypes: Vec<String>,
    /// Transitive subtypes, nearest first.
    pub subtypes: Vec<String>,
}

/// A classified persistence call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrudCall {
    pub call_site: CallSiteId,
    pub caller: CallableId,
    pub line: usize,
    pub operation: CrudOperation,
    pub entity: Option<TypeId>,
}

/// Aggregated call edge between two types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeEdge {
    pub source: TypeId,
    pub target: TypeId,
    pub calls: usize,
}

pub struct ModelQuery {
    artifact: Arc<AnalysisArtifact>,
}

impl ModelQuery {
    pub fn new(artifact: Arc<AnalysisArtifact>) -> Self {
        Self { artifact }
    }

    pub fn artifact(&self) -> &AnalysisArtifact {
        &self.artifact
    }

    pub fn model(&self) -> &CanonicalModel {
        &self.artifact.model
    }

    fn require(&self, level: AnalysisLevel) -> AnalysisError {
        AnalysisError::UnsupportedLevel {
            adapter: self.artifact.adapter.clone(),
            requested: level,
            supported: self.artifact.level(),
        }
    }

    fn table(&self) -> Result<&SymbolTable> {
        self.artifact
            .symbol_table
            .as_deref()
            .ok_or_else(|| self.require(AnalysisLevel::SymbolTable))
    }

    fn graph(&self) -> Result<&CallGraph> {
        self.artifact
            .call_graph
            .as_deref()
            .ok_or_else(|| self.require(AnalysisLevel::CallGraph))
    }

    fn facts(&self) -> Result<&DerivedFacts> {
        self.artifact
            .facts
            .as_deref()
            .ok_or_else(|| self.require(AnalysisLevel::CallGraphInference))
    }

    /// Entity declared under a qualified type name or callable signature.
    pub fn lookup(&self, qualified_name: &str) -> Result<EntityId> {
        self.table()?.lookup(qualified_name)
    }

    pub fn type_by_name(&self, qualified_name: &str) -> Result<&TypeDecl> {
        let id = self
            .table()?
            .type_by_name(qualified_name)
            .ok_or_else(|| not_found(qualified_name))?;
        self.model().type_decl(id).ok_or_else(|| not_found(qualified_name))
    }

    /// Callable under a signature, or the first overload of a bare name.
    pub fn callable_by_signature(&self, signature: &str) -> Result<&Callable> {
        match self.lookup(signature)? {
            EntityId::Callable(id) => self.model().callable(id).ok_or_else(|| not_found(signature)),
            _ => Err(not_found(signature)),
        }
    }

    /// Distinct callables with a resolved call to `signature`.
    pub fn callers_of(&self, signature: &str) -> Result<Vec<&Callable>> {
        let target = self.callable_by_signature(signature)?.id;
        let graph = self.graph()?;
        Ok(self.callables(graph.callers_of(target)))
    }

    /// Distinct callables `signature` has a resolved call to.
    pub fn callees_of(&self, signature: &str) -> Result<Vec<&Callable>> {
        let source = self.callable_by_signature(signature)?.id;
        let graph = self.graph()?;
        Ok(self.callables(graph.callees_of(source)))
    }

    pub fn reachable_from(&self, signature: &str) -> Result<Vec<&Callable>> {
        let start = self.callable_by_signature(signature)?.id;
        let graph = self.graph()?;
        Ok(self.callables(graph.reachable_from(start)))
    }

    fn callables(&self, ids: Vec<CallableId>) -> Vec<&Callable> {
        ids.into_iter()
            .filter_map(|id| self.model().callable(id))
            .collect()
    }

    pub fn type_hierarchy(&self, qualified_name: &str) -> Result<TypeHierarchy> {
        let table = self.table()?;
        let decl = self.type_by_name(qualified_name)?;
        let name_of = |id: TypeId| {
            self.model()
                .type_decl(id)
                .map(|t| t.qualified_name.clone())
                .unwrap_or_else(|| id.to_string())
        };

        let chain = table.supertype_chain(decl.id);
        let mut external = Vec::new();
        for id in std::iter::once(decl.id).chain(chain.iter().copied()) {
            if let Some(t) = self.model().type_decl(id) {
                for sup in &t.supertypes {
                    if table.resolve_type_name(self.model(), sup, t.unit).is_none()
                        && !external.contains(sup)
                    {
                        external.push(sup.clone());
                    }
                }
            }
        }

        let mut subtypes = Vec::new();
        let mut seen = BTreeSet::from([table.canonical(decl.id)]);
        let mut queue = VecDeque::from([decl.id]);
        while let Some(current) = queue.pop_front() {
            for sub in table.direct_subtypes(current) {
                if seen.insert(sub) {
                    subtypes.push(sub);
                    queue.push_back(sub);
                }
            }
        }

        Ok(TypeHierarchy {
            type_id: decl.id,
            qualified_name: decl.qualified_name.clone(),
            supertypes: chain.into_iter().map(name_of).collect(),
            external_supertypes: external,
            subtypes: subtypes.into_iter().map(name_of).collect(),
        })
    }

    /// Direct subtypes within the source set.
    pub fn subtypes_of(&self, qualified_name: &str) -> Result<Vec<&TypeDecl>> {
        let id = self.type_by_name(qualified_name)?.id;
        Ok(self
            .table()?
            .direct_subtypes(id)
            .into_iter()
            .filter_map(|t| self.model().type_decl(t))
            .collect())
    }

    fn members(&self, qualified_name: &str) -> Result<Vec<&Callable>> {
        let id = self.type_by_name(qualified_name)?.id;
        Ok(self
            .table()?
            .members_of(id)
            .iter()
            .filter_map(|c| self.model().callable(*c))
            .collect())
    }

    pub fn methods_of(&self, qualified_name: &str) -> Result<Vec<&Callable>> {
        let mut members = self.members(qualified_name)?;
        members.retain(|c| !c.modifiers.is_constructor);
        Ok(members)
    }

    pub fn constructors_of(&self, qualified_name: &str) -> Result<Vec<&Callable>> {
        let mut members = self.members(qualified_name)?;
        members.retain(|c| c.modifiers.is_constructor);
        Ok(members)
    }

    pub fn fields_of(&self, qualified_name: &str) -> Result<&[Field]> {
        Ok(&self.type_by_name(qualified_name)?.fields)
    }

    /// Types declared directly inside `qualified_name`.
    pub fn nested_types_of(&self, qualified_name: &str) -> Result<Vec<&TypeDecl>> {
        let table = self.table()?;
        let outer = table.canonical(self.type_by_name(qualified_name)?.id);
        Ok(self
            .model()
            .types
            .iter()
            .filter(|t| t.enclosing.is_some_and(|e| table.canonical(e) == outer))
            .collect())
    }

    /// Callables carrying any of `annotations`, grouped by annotation name.
    ///
    /// Annotations nothing carries are left out of the map.
    pub fn methods_with_annotations(&self, annotations: &[&str]) -> BTreeMap<String, Vec<&Callable>> {
        let mut grouped: BTreeMap<String, Vec<&Callable>> = BTreeMap::new();
        for callable in &self.model().callables {
            for wanted in annotations {
                let wanted = annotation_name(wanted);
                if has_annotation(&callable.annotations, wanted) {
                    grouped.entry(wanted.to_string()).or_default().push(callable);
                }
            }
        }
        grouped
    }

    /// Unit tests: JUnit-annotated Java methods, `test`-prefixed Python functions.
    pub fn test_methods(&self) -> Vec<&Callable> {
        let python = self.model().language == Language::Python;
        self.model()
            .callables
            .iter()
            .filter(|c| {
                TEST_ANNOTATIONS.iter().any(|a| has_annotation(&c.annotations, a))
                    || (python && c.name.starts_with("test"))
            })
            .collect()
    }

    /// Lines in `caller` that call a method named like `target`.
    ///
    /// `target` may be a bare name or a signature; only its simple name is
    /// compared, so unresolved calls count too.
    pub fn calling_lines(&self, caller: &str, target: &str) -> Result<Vec<usize>> {
        if self.artifact.level() < AnalysisLevel::CallGraph {
            return Err(self.require(AnalysisLevel::CallGraph));
        }
        let caller = self.callable_by_signature(caller)?;
        let head = target.split('(').next().unwrap_or(target).trim();
        let name = signature::simple_name(head);
        let mut lines: Vec<usize> = caller
            .call_sites
            .iter()
            .filter_map(|id| self.model().call_site(*id))
            .filter(|site| site.guess.method_name == name)
            .map(|site| site.line)
            .collect();
        lines.sort_unstable();
        lines.dedup();
        Ok(lines)
    }

    /// Comments bound to an entity, in source order.
    pub fn comments_for(&self, entity: EntityId) -> Result<Vec<&Comment>> {
        if !self.model().contains(entity) {
            return Err(not_found(&entity.to_string()));
        }
        let model = self.model();
        let comments = match entity {
            // A unit's own comments, not those bound to its declarations.
            EntityId::Unit(_) => model
                .comment_ids(entity)
                .iter()
                .filter_map(|id| model.comment(*id))
                .filter(|c| c.owner == entity)
                .collect(),
            _ => model
                .comment_ids(entity)
                .iter()
                .filter_map(|id| model.comment(*id))
                .collect(),
        };
        Ok(comments)
    }

    /// Every comment of a file, whatever it is bound to.
    pub fn comments_in_file(&self, path: &str) -> Result<Vec<&Comment>> {
        let model = self.model();
        let unit = model
            .units
            .iter()
            .find(|u| u.path == path)
            .ok_or_else(|| not_found(path))?;
        Ok(unit
            .comments
            .iter()
            .filter_map(|id| model.comment(*id))
            .collect())
    }

    /// Documentation comments bound to a type or callable.
    pub fn docstrings(&self) -> Vec<(EntityId, &Comment)> {
        self.model()
            .comments
            .iter()
            .filter(|c| c.is_doc && matches!(c.owner, EntityId::Type(_) | EntityId::Callable(_)))
            .map(|c| (c.owner, c))
            .collect()
    }

    /// The derived fact of `kind` for an entity, if a classifier produced one.
    pub fn derived_facts(&self, entity: EntityId, kind: FactKind) -> Result<Option<&Fact>> {
        if !self.model().contains(entity) {
            return Err(not_found(&entity.to_string()));
        }
        Ok(self.facts()?.get(entity, kind))
    }

    pub fn entry_point_callables(&self) -> Result<Vec<(&Callable, &str)>> {
        Ok(self
            .entry_points()?
            .filter_map(|(id, reason)| match id {
                EntityId::Callable(c) => self.model().callable(c).map(|c| (c, reason)),
                _ => None,
            })
            .collect())
    }

    pub fn entry_point_types(&self) -> Result<Vec<(&TypeDecl, &str)>> {
        Ok(self
            .entry_points()?
            .filter_map(|(id, reason)| match id {
                EntityId::Type(t) => self.model().type_decl(t).map(|t| (t, reason)),
                _ => None,
            })
            .collect())
    }

    fn entry_points(&self) -> Result<impl Iterator<Item = (EntityId, &str)> + '_> {
        Ok(self
            .facts()?
            .of_kind(FactKind::EntryPoint)
            .iter()
            .filter_map(|e| match &e.fact {
                Fact::EntryPoint { reason } => Some((e.entity, reason.as_str())),
                _ => None,
            }))
    }

    /// Classified persistence calls, optionally of one operation only.
    ///
    /// Without a filter, unclassified call sites are left out.
    pub fn crud_operations(&self, operation: Option<CrudOperation>) -> Result<Vec<CrudCall>> {
        let model = self.model();
        Ok(self
            .facts()?
            .of_kind(FactKind::Crud)
            .iter()
            .filter_map(|e| match (e.entity, &e.fact) {
                (EntityId::CallSite(site), Fact::Crud { operation, entity }) => {
                    Some((site, *operation, *entity))
                }
                _ => None,
            })
            .filter(|(_, op, _)| match operation {
                Some(wanted) => *op == wanted,
                None => *op != CrudOperation::Unclassified,
            })
            .filter_map(|(site, op, entity)| {
                let call_site = model.call_site(site)?;
                Some(CrudCall {
                    call_site: site,
                    caller: call_site.caller,
                    line: call_site.line,
                    operation: op,
                    entity,
                })
            })
            .collect())
    }

    pub fn unresolved_call_sites(&self) -> Result<Vec<&CallSite>> {
        Ok(self
            .graph()?
            .unresolved()
            .filter_map(|e| self.model().call_site(e.call_site))
            .collect())
    }

    /// Resolved calls aggregated to owning types, ordered by (source, target).
    pub fn class_call_graph(&self) -> Result<Vec<TypeEdge>> {
        let graph = self.graph()?;
        let table = self.table()?;
        let owner = |id: CallableId| {
            self.model()
                .callable(id)
                .and_then(|c| c.owner)
                .map(|t| table.canonical(t))
        };
        let mut counts: BTreeMap<(TypeId, TypeId), usize> = BTreeMap::new();
        for edge in graph.edges() {
            let CallTarget::Resolved(target) = edge.target else {
                continue;
            };
            if let (Some(source), Some(target)) = (owner(edge.source), owner(target)) {
                if source != target {
                    *counts.entry((source, target)).or_default() += 1;
                }
            }
        }
        Ok(counts
            .into_iter()
            .map(|((source, target), calls)| TypeEdge {
                source,
                target,
                calls,
            })
            .collect())
    }
}

fn not_found(name: &str) -> AnalysisError {
    AnalysisError::NotFound {
        name: name.to_string(),
    }
}

#[cfg(all(test, feature = "tree-sitter"))]
mod tests {
    use super::*;
    use crate::adapter::{SourceInput, SourceSet};
    use crate::config::EngineConfig;
    use crate::model::Language;
    use crate::pipeline::Pipeline;

    const SHOP: &str = r#"
package shop;

/** Something stored. */
@Entity
public class Order extends BaseEntity {
    /** Persist this order. */
    public void save() {}
}

class BaseEntity {}

class OrderService {
    void process(Order order) {
        order.save();
        order.refresh();
    }
}
"#;

    const ORDER_TEST: &str = r#"
package shop;

public class OrderTest {
    static class Fixture {
        static class Row {}
    }

    @Test
    public void savesOrder() {
        Order order = new Order();
        order.save();
        order.save();
        helper();
    }

    @Test
    @Deprecated
    void legacy() {}

    void helper() {}
}

class Order {
    void save() {}
}
"#;

    fn query(level: AnalysisLevel) -> ModelQuery {
        query_source(SHOP, level)
    }

    fn query_source(source: &str, level: AnalysisLevel) -> ModelQuery {
        let set = SourceSet::new("shop", Language::Java, vec![SourceInput::file("shop/Order.java", source)]);
        let artifact = Pipeline::with_config(EngineConfig::default())
            .build(&set, level)
            .unwrap();
        ModelQuery::new(Arc::new(artifact))
    }

    #[test]
    fn test_callers_and_callees() {
        let q = query(AnalysisLevel::CallGraph);
        let callers = q.callers_of("shop.Order.save()").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].signature.key(), "shop.OrderService.process(Order)");

        let callees = q.callees_of("shop.OrderService.process(Order)").unwrap();
        assert_eq!(callees[0].name, "save");
        assert_eq!(q.unresolved_call_sites().unwrap().len(), 1);
        assert!(matches!(
            q.callers_of("shop.Missing.run()"),
            Err(AnalysisError::NotFound { .. })
        ));
    }

    #[test]
    fn test_hierarchy_and_comments() {
        let q = query(AnalysisLevel::SymbolTable);
        let hierarchy = q.type_hierarchy("shop.BaseEntity").unwrap();
        assert_eq!(hierarchy.subtypes, vec!["shop.Order"]);
        let order = q.type_hierarchy("shop.Order").unwrap();
        assert_eq!(order.supertypes, vec!["shop.BaseEntity"]);

        let save = q.callable_by_signature("shop.Order.save()").unwrap();
        let docs = q.comments_for(EntityId::Callable(save.id)).unwrap();
        assert_eq!(docs[0].text, "/** Persist this order. */");
        assert_eq!(q.docstrings().len(), 2);
        assert_eq!(q.comments_in_file("shop/Order.java").unwrap().len(), 2);

        // Call graph queries need a higher level.
        assert!(matches!(
            q.callers_of("shop.Order.save()"),
            Err(AnalysisError::UnsupportedLevel { .. })
        ));
    }

    #[test]
    fn test_crud_facts() {
        let q = query(AnalysisLevel::CallGraphInference);
        let creates = q.crud_operations(Some(CrudOperation::Create)).unwrap();
        assert_eq!(creates.len(), 1);
        assert_eq!(creates[0].line, 15);
        assert!(q.crud_operations(None).unwrap().len() == 1);

        let order = q.lookup("shop.Order").unwrap();
        assert!(matches!(
            q.derived_facts(order, FactKind::PersistentEntity).unwrap(),
            Some(Fact::PersistentEntity { .. })
        ));
    }

    #[test]
    fn test_nested_types() {
        let q = query_source(ORDER_TEST, AnalysisLevel::SymbolTable);
        let nested: Vec<&str> = q
            .nested_types_of("shop.OrderTest")
            .unwrap()
            .iter()
            .map(|t| t.qualified_name.as_str())
            .collect();
        assert_eq!(nested, vec!["shop.OrderTest.Fixture"]);
        assert_eq!(q.nested_types_of("shop.OrderTest.Fixture").unwrap().len(), 1);
        assert!(q.nested_types_of("shop.Order").unwrap().is_empty());
    }

    #[test]
    fn test_annotated_and_test_methods() {
        let q = query_source(ORDER_TEST, AnalysisLevel::SymbolTable);
        let grouped = q.methods_with_annotations(&["Test", "@Deprecated", "Ignore"]);
        let keys: Vec<&str> = grouped.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Deprecated", "Test"]);
        let names: Vec<&str> = grouped["Test"].iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["savesOrder", "legacy"]);
        assert_eq!(grouped["Deprecated"][0].name, "legacy");

        let tests: Vec<&str> = q.test_methods().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(tests, vec!["savesOrder", "legacy"]);
    }

    #[test]
    fn test_calling_lines() {
        let q = query_source(ORDER_TEST, AnalysisLevel::CallGraph);
        let caller = "shop.OrderTest.savesOrder()";
        assert_eq!(q.calling_lines(caller, "save").unwrap(), vec![12, 13]);
        assert_eq!(q.calling_lines(caller, "shop.Order.save()").unwrap(), vec![12, 13]);
        assert_eq!(q.calling_lines(caller, "Order").unwrap(), vec![11]);
        assert!(q.calling_lines(caller, "delete").unwrap().is_empty());

        let low = query_source(ORDER_TEST, AnalysisLevel::SymbolTable);
        assert!(matches!(
            low.calling_lines(caller, "save"),
            Err(AnalysisError::UnsupportedLevel { .. })
        ));
    }

    #[test]
    fn test_python_test_functions() {
        let source = "def test_save():\n    pass\n\n\ndef helper():\n    pass\n";
        let set = SourceSet::new("tests", Language::Python, vec![SourceInput::file("test_app.py", source)]);
        let artifact = Pipeline::with_config(EngineConfig::default())
            .build(&set, AnalysisLevel::SymbolTable)
            .unwrap();
        let q = ModelQuery::new(Arc::new(artifact));
        let names: Vec<&str> = q.test_methods().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["test_save"]);
    }
}
