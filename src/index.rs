//! Symbol index over one generation's canonical model.
//!
//! Types are keyed by qualified name and callables by canonical signature
//! text. Every map is a `BTreeMap`, so two builds over byte-identical models
//! produce identical tables.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};
use crate::model::signature::{normalize_type, simple_name};
use crate::model::{
    CallableId, CanonicalModel, EntityId, Strategy, TypeDecl, TypeId, UnitId,
};

/// Name tables of one generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolTable {
    /// Qualified type name -> type.
    types: BTreeMap<String, TypeId>,
    /// Canonical signature key -> callable.
    callables: BTreeMap<String, CallableId>,
    /// Qualified callable name -> overload set, in declaration order.
    overloads: BTreeMap<String, Vec<CallableId>>,
    /// Simple name -> every entity declaring it.
    simple_names: BTreeMap<String, BTreeSet<EntityId>>,
    /// File path -> types and callables declared there.
    by_file: BTreeMap<String, Vec<EntityId>>,
    /// Members of each indexed type, merged across partial declarations.
    members: BTreeMap<TypeId, Vec<CallableId>>,
    /// Resolved direct supertypes of each indexed type.
    supertypes: BTreeMap<TypeId, Vec<TypeId>>,
    /// Merged duplicates -> the declaration holding their key.
    #[serde(skip)]
    aliases: BTreeMap<TypeId, TypeId>,
    /// Entity -> the key it is indexed under.
    #[serde(skip)]
    keys: BTreeMap<EntityId, String>,
}

impl SymbolTable {
    /// Index every type and callable of `model`.
    ///
    /// For rich artifacts any collision is a producer defect and fails with
    /// `DuplicateQualifiedName`. Syntax-tree models merge duplicate types
    /// (partial declarations) and keep the first of duplicate callables.
    pub fn build(model: &CanonicalModel) -> Result<SymbolTable> {
        let strict = model.strategy == Strategy::RichArtifact;
        let mut table = SymbolTable::default();

        for decl in &model.types {
            let id = EntityId::Type(decl.id);
            table.add_simple_name(&decl.name, id);
            table.add_file_entry(model, decl.unit, id);

            match table.types.get(&decl.qualified_name).copied() {
                Some(first) => {
                    if strict {
                        return Err(duplicate(model, &decl.qualified_name, EntityId::Type(first), id));
                    }
                    debug!(name = %decl.qualified_name, "merging partial type declaration");
                    table.aliases.insert(decl.id, first);
                    table
                        .members
                        .entry(first)
                        .or_default()
                        .extend(decl.members.iter().copied());
                }
                None => {
                    table.types.insert(decl.qualified_name.clone(), decl.id);
                    table.members.insert(decl.id, decl.members.clone());
                }
            }
            table.keys.insert(id, decl.qualified_name.clone());
        }

        for callable in &model.callables {
            let id = EntityId::Callable(callable.id);
            let key = callable.signature.key();
            if let Some(first) = table.callables.get(&key).copied() {
                if strict {
                    return Err(duplicate(model, &key, EntityId::Callable(first), id));
                }
                warn!(signature = %key, "duplicate callable signature; keeping first declaration");
                continue;
            }
            table.add_simple_name(&callable.name, id);
            table.add_file_entry(model, callable.unit, id);
            table.callables.insert(key.clone(), callable.id);
            table
                .overloads
                .entry(callable.signature.qualified_name.clone())
                .or_default()
                .push(callable.id);
            table.keys.insert(id, key);
        }

        // Supertype names resolve only once every type is keyed.
        for decl in &model.types {
            let resolved: Vec<TypeId> = decl
                .supertypes
                .iter()
                .filter_map(|name| table.resolve_type_name(model, name, decl.unit))
                .collect();
            let canonical = table.canonical(decl.id);
            let entry = table.supertypes.entry(canonical).or_default();
            for id in resolved {
                if id != canonical && !entry.contains(&id) {
                    entry.push(id);
                }
            }
        }

        debug!(
            types = table.types.len(),
            callables = table.callables.len(),
            files = table.by_file.len(),
            "built symbol table"
        );
        Ok(table)
    }

    fn add_simple_name(&mut self, name: &str, id: EntityId) {
        self.simple_names.entry(name.to_string()).or_default().insert(id);
    }

    fn add_file_entry(&mut self, model: &CanonicalModel, unit: UnitId, id: EntityId) {
        if let Some(unit) = model.unit(unit) {
            self.by_file.entry(unit.path.clone()).or_default().push(id);
        }
    }

    /// Look up a type by qualified name or a callable by signature.
    ///
    /// A bare qualified callable name matches its first declared overload.
    pub fn lookup(&self, name: &str) -> Result<EntityId> {
        if let Some(id) = self.types.get(name) {
            return Ok(EntityId::Type(*id));
        }
        if let Some(id) = self.callable_by_key(name) {
            return Ok(EntityId::Callable(id));
        }
        if let Some(id) = self.overloads.get(name).and_then(|ids| ids.first()) {
            return Ok(EntityId::Callable(*id));
        }
        Err(AnalysisError::NotFound {
            name: name.to_string(),
        })
    }

    /// Every entity declared under a simple name. Ambiguity is left to the caller.
    pub fn find_by_simple_name(&self, name: &str) -> BTreeSet<EntityId> {
        self.simple_names.get(name).cloned().unwrap_or_default()
    }

    pub fn type_by_name(&self, qualified_name: &str) -> Option<TypeId> {
        self.types.get(qualified_name).copied()
    }

    /// Callable under a signature key, normalizing its parameter types.
    pub fn callable_by_key(&self, signature: &str) -> Option<CallableId> {
        if let Some(id) = self.callables.get(signature) {
            return Some(*id);
        }
        let (name, params) = crate::model::signature::parse_signature(signature)?;
        self.callables
            .get(&crate::model::signature::canonical(&name, &params))
            .copied()
    }

    /// Overloads declared under a qualified callable name.
    pub fn overloads(&self, qualified_name: &str) -> &[CallableId] {
        self.overloads
            .get(qualified_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Types and callables declared in a file, in declaration order.
    pub fn entities_in_file(&self, path: &str) -> &[EntityId] {
        self.by_file.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reverse lookup: the key an entity is indexed under.
    pub fn key_of(&self, id: EntityId) -> Option<&str> {
        self.keys.get(&id).map(String::as_str)
    }

    /// All indexed qualified type names.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// All indexed callable signature keys.
    pub fn signatures(&self) -> impl Iterator<Item = &str> {
        self.callables.keys().map(String::as_str)
    }

    /// The declaration a merged duplicate was folded into.
    pub fn canonical(&self, id: TypeId) -> TypeId {
        self.aliases.get(&id).copied().unwrap_or(id)
    }

    /// Members of a type, including those of merged partial declarations.
    pub fn members_of(&self, id: TypeId) -> &[CallableId] {
        self.members
            .get(&self.canonical(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolved direct supertypes.
    pub fn direct_supertypes(&self, id: TypeId) -> &[TypeId] {
        self.supertypes
            .get(&self.canonical(id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Indexed types whose direct supertypes include `id`.
    pub fn direct_subtypes(&self, id: TypeId) -> Vec<TypeId> {
        let target = self.canonical(id);
        self.supertypes
            .iter()
            .filter(|(_, supers)| supers.contains(&target))
            .map(|(sub, _)| *sub)
            .collect()
    }

    /// All transitive supertypes, nearest first. Cycles are cut.
    pub fn supertype_chain(&self, id: TypeId) -> Vec<TypeId> {
        let start = self.canonical(id);
        let mut seen = BTreeSet::from([start]);
        let mut chain = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for &parent in self.direct_supertypes(current) {
                if seen.insert(parent) {
                    chain.push(parent);
                    queue.push_back(parent);
                }
            }
        }
        chain
    }

    /// Whether `sub` is `sup` or transitively extends it.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let sup = self.canonical(sup);
        self.canonical(sub) == sup || self.supertype_chain(sub).contains(&sup)
    }

    /// Resolve a type name as written in `unit`.
    ///
    /// Tries the name as qualified, then relative to the unit's package and
    /// imports, then a unique simple-name match.
    pub fn resolve_type_name(
        &self,
        model: &CanonicalModel,
        name: &str,
        unit: UnitId,
    ) -> Option<TypeId> {
        let name = normalize_type(name);
        let name = name.trim_end_matches("[]");
        if let Some(id) = self.types.get(name) {
            return Some(*id);
        }

        if let Some(unit) = model.unit(unit) {
            if let Some(package) = unit.package.as_deref().filter(|p| !p.is_empty()) {
                if let Some(id) = self.types.get(&format!("{}.{}", package, name)) {
                    return Some(*id);
                }
            }
            // `Outer.Inner` is imported through `Outer`.
            let head = name.split('.').next().unwrap_or(name);
            for import in &unit.imports {
                let candidate = if let Some(prefix) = import.strip_suffix(".*") {
                    format!("{}.{}", prefix, name)
                } else if simple_name(import) == head {
                    format!("{}{}", import, &name[head.len()..])
                } else {
                    continue;
                };
                if let Some(id) = self.types.get(&candidate) {
                    return Some(*id);
                }
            }
            // Types nested in a type of the same unit.
            for type_id in &unit.types {
                if let Some(decl) = model.type_decl(*type_id) {
                    if let Some(id) = self.types.get(&format!("{}.{}", decl.qualified_name, name)) {
                        return Some(*id);
                    }
                }
            }
        }

        let mut matches = self
            .simple_names
            .get(simple_name(name))?
            .iter()
            .filter_map(|id| match id {
                EntityId::Type(t) => Some(self.canonical(*t)),
                _ => None,
            })
            .collect::<BTreeSet<_>>()
            .into_iter();
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Whether a value of type `from` can be passed where `to` is declared.
    ///
    /// Identical simple types, numeric widening, universal supertypes and
    /// indexed subtyping count as assignable.
    pub fn is_assignable(&self, model: &CanonicalModel, from: &str, to: &str, unit: UnitId) -> bool {
        let from_simple = simple_type_name(from);
        let to_simple = simple_type_name(to);
        if from_simple == to_simple || matches!(to_simple.as_str(), "Object" | "object" | "_") {
            return true;
        }
        if widens(&from_simple, &to_simple) {
            return true;
        }
        match (
            self.resolve_type_name(model, from, unit),
            self.resolve_type_name(model, to, unit),
        ) {
            (Some(sub), Some(sup)) => self.is_subtype(sub, sup),
            _ => false,
        }
    }
}

fn simple_type_name(raw: &str) -> String {
    crate::model::signature::simple_type(raw)
}

/// Primitive widening and boxing between Java/C numeric types and Python numbers.
fn widens(from: &str, to: &str) -> bool {
    let rank = |t: &str| match t {
        "byte" | "Byte" => Some(1),
        "short" | "Short" | "char" | "Character" => Some(2),
        "int" | "Integer" | "bool" => Some(3),
        "long" | "Long" => Some(4),
        "float" | "Float" => Some(5),
        "double" | "Double" => Some(6),
        _ => None,
    };
    fn boxed(t: &str) -> &str {
        match t {
            "Integer" => "int",
            "Long" => "long",
            "Double" => "double",
            "Float" => "float",
            "Short" => "short",
            "Byte" => "byte",
            "Character" => "char",
            "Boolean" => "boolean",
            other => other,
        }
    }
    if boxed(from) == boxed(to) {
        return true;
    }
    matches!((rank(from), rank(to)), (Some(a), Some(b)) if a < b)
}

fn duplicate(model: &CanonicalModel, name: &str, first: EntityId, second: EntityId) -> AnalysisError {
    let describe = |id: EntityId| {
        let path = model.path_of(id).unwrap_or("<unknown>");
        let line = match id {
            EntityId::Type(t) => model.type_decl(t).map(|t: &TypeDecl| t.span.start_line),
            EntityId::Callable(c) => model.callable(c).map(|c| c.start_line),
            _ => None,
        };
        match line {
            Some(line) => format!("{}:{}", path, line),
            None => path.to_string(),
        }
    };
    AnalysisError::DuplicateQualifiedName {
        name: name.to_string(),
        first: describe(first),
        second: describe(second),
    }
}
