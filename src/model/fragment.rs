//! Per-file fragments produced by adapters before ids are assigned.
//!
//! Fragments reference their own types and callables by local index. The
//! single-writer merge in [`CanonicalModel::assemble`](super::CanonicalModel::assemble)
//! turns local indices into generation-wide ids.

use super::entities::{CalleeGuess, Field, Modifiers, Parameter, Signature, Span, TypeKind};
use super::level::Language;

/// Everything one adapter invocation extracted from one file.
#[derive(Debug, Clone)]
pub struct UnitFragment {
    pub path: String,
    pub language: Language,
    pub package: Option<String>,
    pub imports: Vec<String>,
    /// Types in declaration order, nested types included.
    pub types: Vec<TypeFragment>,
    /// Callables in declaration order, methods and free functions alike.
    pub callables: Vec<CallableFragment>,
    pub comments: Vec<CommentFragment>,
    pub has_parse_errors: bool,
}

impl UnitFragment {
    pub fn new(path: impl Into<String>, language: Language) -> Self {
        Self {
            path: path.into(),
            language,
            package: None,
            imports: Vec::new(),
            types: Vec::new(),
            callables: Vec::new(),
            comments: Vec::new(),
            has_parse_errors: false,
        }
    }

    /// Total call sites across all callables.
    pub fn call_site_count(&self) -> usize {
        self.callables.iter().map(|c| c.call_sites.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct TypeFragment {
    pub name: String,
    pub qualified_name: String,
    pub kind: TypeKind,
    pub supertypes: Vec<String>,
    pub annotations: Vec<String>,
    pub modifiers: Vec<String>,
    pub fields: Vec<Field>,
    pub span: Span,
    /// Local index of the enclosing type.
    pub enclosing: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CallableFragment {
    /// Local index of the declaring type; `None` for free functions.
    pub owner: Option<usize>,
    pub name: String,
    pub signature: Signature,
    pub return_type: Option<String>,
    pub parameters: Vec<Parameter>,
    pub modifiers: Modifiers,
    pub annotations: Vec<String>,
    pub start_line: usize,
    pub span: Span,
    pub call_sites: Vec<CallSiteFragment>,
}

#[derive(Debug, Clone)]
pub struct CallSiteFragment {
    pub guess: CalleeGuess,
    pub arguments: Vec<String>,
    pub line: usize,
    pub span: Option<Span>,
}

/// Explicit owner for a comment the producer already bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOwner {
    Unit,
    Type(usize),
    Callable(usize),
}

#[derive(Debug, Clone)]
pub struct CommentFragment {
    pub text: String,
    pub span: Span,
    pub is_doc: bool,
    /// `None` binds the comment by span containment during assembly.
    pub owner: Option<LocalOwner>,
}
