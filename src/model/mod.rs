//! Canonical program model.
//!
//! One [`CanonicalModel`] holds every entity of a single generation. It is
//! assembled once from per-file fragments and never mutated afterwards.
//!
//! ```text
//! ┌──────────────┐   assemble   ┌────────────────┐
//! │ UnitFragment │─────────────▶│ CanonicalModel │
//! │  (per file)  │  (one writer)│ units, types,  │
//! └──────────────┘              │ callables, ... │
//!                               └────────────────┘
//! ```

mod entities;
mod fragment;
mod level;
pub mod signature;

pub use entities::{
    annotation_name, has_annotation, CallSite, CallSiteId, Callable, CallableId, CalleeGuess,
    Comment, CommentId, CompilationUnit, EntityId, Field, Modifiers, Parameter, Signature, Span,
    TypeDecl, TypeId, TypeKind, UnitId,
};
pub use fragment::{
    CallSiteFragment, CallableFragment, CommentFragment, LocalOwner, TypeFragment, UnitFragment,
};
pub use level::{AnalysisLevel, Language, Strategy};

use serde::Serialize;

/// All entities of one generation, addressed by dense ids.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalModel {
    pub strategy: Strategy,
    pub language: Language,
    pub units: Vec<CompilationUnit>,
    pub types: Vec<TypeDecl>,
    pub callables: Vec<Callable>,
    pub call_sites: Vec<CallSite>,
    pub comments: Vec<Comment>,
}

impl CanonicalModel {
    /// Merge per-file fragments into one model.
    ///
    /// Fragments are ordered by path before ids are assigned, so the result
    /// does not depend on the order in which workers finished.
    pub fn assemble(
        strategy: Strategy,
        language: Language,
        mut fragments: Vec<UnitFragment>,
    ) -> CanonicalModel {
        fragments.sort_by(|a, b| a.path.cmp(&b.path));

        let mut model = CanonicalModel {
            strategy,
            language,
            units: Vec::with_capacity(fragments.len()),
            types: Vec::new(),
            callables: Vec::new(),
            call_sites: Vec::new(),
            comments: Vec::new(),
        };

        for fragment in fragments {
            model.push_fragment(fragment);
        }
        model
    }

    fn push_fragment(&mut self, fragment: UnitFragment) {
        let unit_id = UnitId(self.units.len() as u32);
        let type_base = self.types.len() as u32;
        let callable_base = self.callables.len() as u32;

        let mut unit = CompilationUnit {
            id: unit_id,
            path: fragment.path,
            language: fragment.language,
            package: fragment.package,
            imports: fragment.imports,
            types: Vec::with_capacity(fragment.types.len()),
            callables: Vec::new(),
            comments: Vec::new(),
            has_parse_errors: fragment.has_parse_errors,
        };

        for (local, t) in fragment.types.into_iter().enumerate() {
            let id = TypeId(type_base + local as u32);
            unit.types.push(id);
            self.types.push(TypeDecl {
                id,
                unit: unit_id,
                name: t.name,
                qualified_name: t.qualified_name,
                kind: t.kind,
                supertypes: t.supertypes,
                annotations: t.annotations,
                modifiers: t.modifiers,
                members: Vec::new(),
                fields: t.fields,
                span: t.span,
                enclosing: t.enclosing.map(|i| TypeId(type_base + i as u32)),
                comments: Vec::new(),
            });
        }

        for (local, c) in fragment.callables.into_iter().enumerate() {
            let id = CallableId(callable_base + local as u32);
            let owner = c.owner.map(|i| TypeId(type_base + i as u32));
            match owner {
                Some(owner) => {
                    if let Some(t) = self.types.get_mut(owner.index()) {
                        t.members.push(id);
                    }
                }
                None => unit.callables.push(id),
            }

            let mut sites = Vec::with_capacity(c.call_sites.len());
            for site in c.call_sites {
                let site_id = CallSiteId(self.call_sites.len() as u32);
                sites.push(site_id);
                self.call_sites.push(CallSite {
                    id: site_id,
                    caller: id,
                    guess: site.guess,
                    arguments: site.arguments,
                    line: site.line,
                    span: site.span,
                });
            }

            self.callables.push(Callable {
                id,
                unit: unit_id,
                owner,
                name: c.name,
                signature: c.signature,
                return_type: c.return_type,
                parameters: c.parameters,
                modifiers: c.modifiers,
                annotations: c.annotations,
                start_line: c.start_line,
                span: c.span,
                call_sites: sites,
                comments: Vec::new(),
            });
        }

        let mut comments = fragment.comments;
        comments.sort_by_key(|c| (c.span.start_line, c.span.start_byte));
        for comment in comments {
            let owner = match comment.owner {
                Some(LocalOwner::Unit) => EntityId::Unit(unit_id),
                Some(LocalOwner::Type(i)) => EntityId::Type(TypeId(type_base + i as u32)),
                Some(LocalOwner::Callable(i)) => {
                    EntityId::Callable(CallableId(callable_base + i as u32))
                }
                None => self.bind_comment(unit_id, &unit, &comment, callable_base),
            };
            let id = CommentId(self.comments.len() as u32);
            match owner {
                EntityId::Type(t) => {
                    if let Some(t) = self.types.get_mut(t.index()) {
                        t.comments.push(id);
                    }
                }
                EntityId::Callable(c) => {
                    if let Some(c) = self.callables.get_mut(c.index()) {
                        c.comments.push(id);
                    }
                }
                _ => {}
            }
            unit.comments.push(id);
            self.comments.push(Comment {
                id,
                unit: unit_id,
                owner,
                text: comment.text,
                span: comment.span,
                is_doc: comment.is_doc,
            });
        }

        self.units.push(unit);
    }

    /// Pick the owner of an unbound comment within its unit.
    ///
    /// Order: innermost containing callable, then the declaration a doc
    /// comment directly precedes, then innermost containing type, then the
    /// unit itself.
    fn bind_comment(
        &self,
        unit_id: UnitId,
        unit: &CompilationUnit,
        comment: &CommentFragment,
        callable_base: u32,
    ) -> EntityId {
        let callables = &self.callables[callable_base as usize..];
        let types: Vec<&TypeDecl> = unit.types.iter().map(|id| &self.types[id.index()]).collect();

        if let Some(c) = callables
            .iter()
            .filter(|c| c.span.contains(&comment.span))
            .min_by_key(|c| c.span.extent())
        {
            return EntityId::Callable(c.id);
        }

        if comment.is_doc && comment.span.end_line > 0 {
            let precedes = |span: &Span| {
                let line_ok = span.start_line == comment.span.end_line
                    || span.start_line == comment.span.end_line + 1;
                let byte_ok = !(span.has_bytes() && comment.span.has_bytes())
                    || span.start_byte >= comment.span.end_byte;
                line_ok && byte_ok
            };
            if let Some(c) = callables.iter().find(|c| precedes(&c.span)) {
                return EntityId::Callable(c.id);
            }
            if let Some(t) = types.iter().find(|t| precedes(&t.span)) {
                return EntityId::Type(t.id);
            }
        } else if comment.is_doc && comment.span.has_bytes() {
            // Offsets only: the nearest declaration starting after the comment.
            let following = callables
                .iter()
                .map(|c| (&c.span, EntityId::Callable(c.id)))
                .chain(types.iter().map(|t| (&t.span, EntityId::Type(t.id))))
                .filter(|(span, _)| span.has_bytes() && span.start_byte >= comment.span.end_byte)
                .min_by_key(|(span, _)| span.start_byte);
            if let Some((_, owner)) = following {
                return owner;
            }
        }

        if let Some(t) = types
            .iter()
            .filter(|t| t.span.contains(&comment.span))
            .min_by_key(|t| t.span.extent())
        {
            return EntityId::Type(t.id);
        }

        EntityId::Unit(unit_id)
    }

    pub fn unit(&self, id: UnitId) -> Option<&CompilationUnit> {
        self.units.get(id.index())
    }

    pub fn type_decl(&self, id: TypeId) -> Option<&TypeDecl> {
        self.types.get(id.index())
    }

    pub fn callable(&self, id: CallableId) -> Option<&Callable> {
        self.callables.get(id.index())
    }

    pub fn call_site(&self, id: CallSiteId) -> Option<&CallSite> {
        self.call_sites.get(id.index())
    }

    pub fn comment(&self, id: CommentId) -> Option<&Comment> {
        self.comments.get(id.index())
    }

    /// Whether `id` names an entity of this generation.
    pub fn contains(&self, id: EntityId) -> bool {
        match id {
            EntityId::Unit(id) => id.index() < self.units.len(),
            EntityId::Type(id) => id.index() < self.types.len(),
            EntityId::Callable(id) => id.index() < self.callables.len(),
            EntityId::CallSite(id) => id.index() < self.call_sites.len(),
            EntityId::Comment(id) => id.index() < self.comments.len(),
        }
    }

    /// Comment ids attached directly to an entity.
    pub fn comment_ids(&self, id: EntityId) -> &[CommentId] {
        match id {
            EntityId::Unit(id) => self.unit(id).map(|u| u.comments.as_slice()),
            EntityId::Type(id) => self.type_decl(id).map(|t| t.comments.as_slice()),
            EntityId::Callable(id) => self.callable(id).map(|c| c.comments.as_slice()),
            EntityId::CallSite(_) | EntityId::Comment(_) => None,
        }
        .unwrap_or(&[])
    }

    /// The path of the file declaring an entity.
    pub fn path_of(&self, id: EntityId) -> Option<&str> {
        let unit = match id {
            EntityId::Unit(id) => id,
            EntityId::Type(id) => self.type_decl(id)?.unit,
            EntityId::Callable(id) => self.callable(id)?.unit,
            EntityId::CallSite(id) => self.callable(self.call_site(id)?.caller)?.unit,
            EntityId::Comment(id) => self.comment(id)?.unit,
        };
        self.unit(unit).map(|u| u.path.as_str())
    }

    /// A human-readable name for an entity.
    pub fn display_name(&self, id: EntityId) -> String {
        match id {
            EntityId::Unit(u) => self.unit(u).map(|u| u.path.clone()),
            EntityId::Type(t) => self.type_decl(t).map(|t| t.qualified_name.clone()),
            EntityId::Callable(c) => self.callable(c).map(|c| c.signature.key()),
            EntityId::CallSite(s) => self
                .call_site(s)
                .map(|s| format!("{}@{}", s.guess.method_name, s.line)),
            EntityId::Comment(c) => self.comment(c).map(|c| format!("comment@{}", c.span.start_line)),
        }
        .unwrap_or_else(|| id.to_string())
    }

    /// Callables that are constructors of `type_id`.
    pub fn constructors_of(&self, type_id: TypeId) -> impl Iterator<Item = &Callable> + '_ {
        self.type_decl(type_id)
            .into_iter()
            .flat_map(|t| t.members.iter())
            .filter_map(|id| self.callable(*id))
            .filter(|c| c.modifiers.is_constructor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callable(owner: Option<usize>, name: &str, lines: (usize, usize)) -> CallableFragment {
        CallableFragment {
            owner,
            name: name.to_string(),
            signature: Signature::new(format!("p.{}", name), vec![]),
            return_type: None,
            parameters: vec![],
            modifiers: Modifiers::default(),
            annotations: vec![],
            start_line: lines.0,
            span: Span::lines(lines.0, lines.1),
            call_sites: vec![],
        }
    }

    fn comment(lines: (usize, usize), is_doc: bool) -> CommentFragment {
        CommentFragment {
            text: "c".to_string(),
            span: Span::lines(lines.0, lines.1),
            is_doc,
            owner: None,
        }
    }

    fn sample(path: &str) -> UnitFragment {
        let mut unit = UnitFragment::new(path, Language::Java);
        unit.types.push(TypeFragment {
            name: "A".to_string(),
            qualified_name: "p.A".to_string(),
            kind: TypeKind::Class,
            supertypes: vec![],
            annotations: vec![],
            modifiers: vec![],
            fields: vec![],
            span: Span::lines(3, 20),
            enclosing: None,
        });
        let mut m = callable(Some(0), "m", (6, 10));
        m.call_sites.push(CallSiteFragment {
            guess: CalleeGuess {
                method_name: "n".to_string(),
                ..CalleeGuess::default()
            },
            arguments: vec![],
            line: 7,
            span: None,
        });
        unit.callables.push(m);
        unit.callables.push(callable(Some(0), "n", (12, 14)));
        unit.comments.push(comment((1, 1), false)); // header
        unit.comments.push(comment((4, 5), true)); // javadoc on m
        unit.comments.push(comment((8, 8), false)); // inside m
        unit.comments.push(comment((16, 16), false)); // inside A only
        unit
    }

    #[test]
    fn test_assemble_orders_by_path() {
        let model = CanonicalModel::assemble(
            Strategy::SyntaxTree,
            Language::Java,
            vec![sample("b/B.java"), sample("a/A.java")],
        );
        assert_eq!(model.units[0].path, "a/A.java");
        assert_eq!(model.units[1].path, "b/B.java");
        assert_eq!(model.types.len(), 2);
        assert_eq!(model.types[1].unit, UnitId(1));
        assert_eq!(model.types[1].members, vec![CallableId(2), CallableId(3)]);
        assert_eq!(model.call_sites[1].caller, CallableId(2));
    }

    #[test]
    fn test_comment_binding() {
        let model =
            CanonicalModel::assemble(Strategy::SyntaxTree, Language::Java, vec![sample("A.java")]);
        let owners: Vec<EntityId> = model.comments.iter().map(|c| c.owner).collect();
        assert_eq!(
            owners,
            vec![
                EntityId::Unit(UnitId(0)),
                EntityId::Callable(CallableId(0)),
                EntityId::Callable(CallableId(0)),
                EntityId::Type(TypeId(0)),
            ]
        );
        assert_eq!(model.comment_ids(EntityId::Callable(CallableId(0))).len(), 2);
        assert_eq!(model.units[0].comments.len(), 4);
    }

    #[test]
    fn test_doc_comment_with_offsets_only_binds_by_bytes() {
        let bytes = |start: usize, end: usize| Span {
            start_byte: start,
            end_byte: end,
            ..Span::default()
        };
        let mut unit = UnitFragment::new("A.java", Language::Java);
        unit.callables.push(callable(None, "g", (1, 2)));
        let mut h = callable(None, "h", (3, 4));
        h.span = Span {
            start_byte: 30,
            end_byte: 60,
            ..Span::lines(3, 4)
        };
        unit.callables.push(h);
        for (start, end) in [(10, 20), (70, 80)] {
            unit.comments.push(CommentFragment {
                text: "/** doc */".to_string(),
                span: bytes(start, end),
                is_doc: true,
                owner: None,
            });
        }

        let model = CanonicalModel::assemble(Strategy::RichArtifact, Language::Java, vec![unit]);
        let owners: Vec<EntityId> = model.comments.iter().map(|c| c.owner).collect();
        assert_eq!(
            owners,
            vec![EntityId::Callable(CallableId(1)), EntityId::Unit(UnitId(0))]
        );
    }

    #[test]
    fn test_every_call_site_has_a_caller() {
        let model =
            CanonicalModel::assemble(Strategy::SyntaxTree, Language::Java, vec![sample("A.java")]);
        for site in &model.call_sites {
            let caller = model.callable(site.caller).unwrap();
            assert!(caller.call_sites.contains(&site.id));
        }
    }
}
