//! Canonical entities: compilation units, types, callables, call sites and comments.
//!
//! Entities refer to each other by id only. Cross-file relationships such as
//! supertypes and call targets are names or ids resolved through the symbol
//! index, so the owned-entity graph never contains back-references.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::level::Language;
use super::signature;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Position of the entity in its generation's storage.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a compilation unit within one generation.
    UnitId,
    "unit"
);
entity_id!(
    /// Identifies a type declaration within one generation.
    TypeId,
    "type"
);
entity_id!(
    /// Identifies a callable within one generation.
    CallableId,
    "callable"
);
entity_id!(
    /// Identifies a call site within one generation.
    CallSiteId,
    "callsite"
);
entity_id!(
    /// Identifies a comment within one generation.
    CommentId,
    "comment"
);

/// Any entity of the canonical model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityId {
    Unit(UnitId),
    Type(TypeId),
    Callable(CallableId),
    CallSite(CallSiteId),
    Comment(CommentId),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Unit(id) => id.fmt(f),
            EntityId::Type(id) => id.fmt(f),
            EntityId::Callable(id) => id.fmt(f),
            EntityId::CallSite(id) => id.fmt(f),
            EntityId::Comment(id) => id.fmt(f),
        }
    }
}

/// Source location span with byte offsets and line/column positions.
///
/// Lines and columns are 1-indexed. A span produced from line information
/// alone has zero-length byte offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    /// A span known only by its line range.
    pub fn lines(start_line: usize, end_line: usize) -> Self {
        Self {
            start_line,
            end_line: end_line.max(start_line),
            ..Self::default()
        }
    }

    /// Create a span from a tree-sitter node.
    #[cfg(feature = "tree-sitter")]
    pub fn from_node(node: tree_sitter::Node) -> Self {
        let start = node.start_position();
        let end = node.end_position();
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: start.row + 1, // tree-sitter is 0-indexed
            start_col: start.column + 1,
            end_line: end.row + 1,
            end_col: end.column + 1,
        }
    }

    /// Whether byte offsets were recorded for this span.
    pub fn has_bytes(&self) -> bool {
        self.end_byte > self.start_byte
    }

    /// Whether `other` lies within this span.
    ///
    /// Byte offsets are compared when both spans carry them, lines otherwise.
    pub fn contains(&self, other: &Span) -> bool {
        if self.has_bytes() && other.has_bytes() {
            self.start_byte <= other.start_byte && other.end_byte <= self.end_byte
        } else {
            self.start_line <= other.start_line && other.end_line <= self.end_line
        }
    }

    /// Size used to pick the innermost of several containing spans.
    pub fn extent(&self) -> usize {
        if self.has_bytes() {
            self.end_byte - self.start_byte
        } else {
            (self.end_line - self.start_line) * 10_000
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start_line, self.start_col)
    }
}

/// Kind of type declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
    Struct,
    Union,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
            TypeKind::Record => "record",
            TypeKind::Annotation => "annotation",
            TypeKind::Struct => "struct",
            TypeKind::Union => "union",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Callable modifiers relevant to resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    /// Raw modifier keywords as written (`public`, `static`, ...).
    pub keywords: Vec<String>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_constructor: bool,
    /// Dispatched through the receiver's runtime type.
    pub is_virtual: bool,
}

impl Modifiers {
    /// Derive flags from modifier keywords.
    ///
    /// `owned` is false for free functions, which are never virtual.
    pub fn from_keywords(keywords: Vec<String>, is_constructor: bool, owned: bool) -> Self {
        let has = |kw: &str| keywords.iter().any(|k| k == kw);
        let is_static = has("static");
        let is_abstract = has("abstract");
        let is_virtual =
            owned && !is_static && !is_constructor && !has("private") && !has("final");
        Self {
            keywords,
            is_static,
            is_abstract,
            is_constructor,
            is_virtual,
        }
    }
}

/// A formal parameter of a callable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: Option<String>,
    pub declared_type: Option<String>,
    pub line: usize,
    pub span: Option<Span>,
    /// Has a default value and may be omitted by callers.
    #[serde(default)]
    pub has_default: bool,
    /// Accepts any number of trailing arguments.
    #[serde(default)]
    pub is_variadic: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, declared_type: Option<String>, line: usize) -> Self {
        Self {
            name: Some(name.into()),
            declared_type,
            line,
            span: None,
            has_default: false,
            is_variadic: false,
        }
    }

    /// The type used in signature keys.
    pub fn key_type(&self) -> String {
        self.declared_type
            .as_deref()
            .map(signature::normalize_type)
            .unwrap_or_else(|| signature::UNKNOWN_TYPE.to_string())
    }
}

/// A field declared on a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub declared_type: Option<String>,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<String>,
    pub line: usize,
}

/// A qualified signature: qualified name plus parameter types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub qualified_name: String,
    pub parameter_types: Vec<String>,
}

impl Signature {
    pub fn new(qualified_name: impl Into<String>, parameter_types: Vec<String>) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            parameter_types,
        }
    }

    pub fn arity(&self) -> usize {
        self.parameter_types.len()
    }

    /// The unqualified callable name.
    pub fn name(&self) -> &str {
        signature::simple_name(&self.qualified_name)
    }

    /// Canonical key text, e.g. `com.acme.Order.save(Order,int)`.
    pub fn key(&self) -> String {
        signature::canonical(&self.qualified_name, &self.parameter_types)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// One source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationUnit {
    pub id: UnitId,
    pub path: String,
    pub language: Language,
    pub package: Option<String>,
    pub imports: Vec<String>,
    /// Types declared in this file, including nested ones.
    pub types: Vec<TypeId>,
    /// Top-level callables (functions outside any type).
    pub callables: Vec<CallableId>,
    pub comments: Vec<CommentId>,
    pub has_parse_errors: bool,
}

/// A class, interface, enum, record or struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDecl {
    pub id: TypeId,
    pub unit: UnitId,
    pub name: String,
    pub qualified_name: String,
    pub kind: TypeKind,
    /// Declared supertypes as written; possibly unresolved.
    pub supertypes: Vec<String>,
    pub annotations: Vec<String>,
    pub modifiers: Vec<String>,
    pub members: Vec<CallableId>,
    pub fields: Vec<Field>,
    pub span: Span,
    pub enclosing: Option<TypeId>,
    pub comments: Vec<CommentId>,
}

impl TypeDecl {
    pub fn has_annotation(&self, name: &str) -> bool {
        has_annotation(&self.annotations, name)
    }
}

/// A method, constructor or free function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callable {
    pub id: CallableId,
    pub unit: UnitId,
    pub owner: Option<TypeId>,
    pub name: String,
    pub signature: Signature,
    pub return_type: Option<String>,
    pub parameters: Vec<Parameter>,
    pub modifiers: Modifiers,
    pub annotations: Vec<String>,
    pub start_line: usize,
    pub span: Span,
    pub call_sites: Vec<CallSiteId>,
    pub comments: Vec<CommentId>,
}

impl Callable {
    /// Minimum and maximum argument counts; `None` means unbounded.
    pub fn arity_range(&self) -> (usize, Option<usize>) {
        let required = self
            .parameters
            .iter()
            .filter(|p| !p.has_default && !p.is_variadic)
            .count();
        if self.parameters.iter().any(|p| p.is_variadic) {
            (required, None)
        } else {
            (required, Some(self.parameters.len()))
        }
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        let (min, max) = self.arity_range();
        count >= min && max.map_or(true, |max| count <= max)
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        has_annotation(&self.annotations, name)
    }
}

/// What the producer knows about the callee of a call expression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalleeGuess {
    pub method_name: String,
    pub receiver_expr: Option<String>,
    /// Declared static type of the receiver, when known.
    pub receiver_type: Option<String>,
    /// Argument types, `None` where unknown.
    pub argument_types: Vec<Option<String>>,
    /// A full qualified signature, when the producer resolved one.
    pub signature: Option<String>,
    pub is_constructor_call: bool,
}

/// One call expression, owned by its enclosing callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSite {
    pub id: CallSiteId,
    pub caller: CallableId,
    pub guess: CalleeGuess,
    /// Argument expressions as written.
    pub arguments: Vec<String>,
    pub line: usize,
    pub span: Option<Span>,
}

impl CallSite {
    /// Argument count, from the expressions or the typed arguments, whichever says more.
    pub fn arity(&self) -> usize {
        self.arguments.len().max(self.guess.argument_types.len())
    }
}

/// Free text bound to a unit, type or callable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub unit: UnitId,
    pub owner: EntityId,
    pub text: String,
    pub span: Span,
    /// Documentation comment (javadoc, docstring).
    pub is_doc: bool,
}

/// Annotation match tolerant of `@` prefixes, arguments and qualification.
pub fn has_annotation(annotations: &[String], name: &str) -> bool {
    annotations.iter().any(|a| annotation_name(a) == name)
}

/// The bare name of an annotation or decorator (`@javax.persistence.Entity(x)` -> `Entity`).
pub fn annotation_name(raw: &str) -> &str {
    let trimmed = raw.trim().trim_start_matches('@');
    let head = trimmed.split('(').next().unwrap_or(trimmed).trim();
    signature::simple_name(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn callable_with(params: Vec<Parameter>) -> Callable {
        Callable {
            id: CallableId(0),
            unit: UnitId(0),
            owner: None,
            name: "f".to_string(),
            signature: Signature::new("m.f", vec![]),
            return_type: None,
            parameters: params,
            modifiers: Modifiers::default(),
            annotations: vec![],
            start_line: 1,
            span: Span::lines(1, 2),
            call_sites: vec![],
            comments: vec![],
        }
    }

    #[test]
    fn test_span_containment() {
        let outer = Span { start_byte: 0, end_byte: 100, start_line: 1, end_line: 10, ..Span::default() };
        let inner = Span { start_byte: 10, end_byte: 20, start_line: 2, end_line: 2, ..Span::default() };
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));

        // Line-only spans fall back to line comparison.
        assert!(Span::lines(1, 10).contains(&Span::lines(3, 4)));
        assert!(!Span::lines(3, 4).contains(&Span::lines(1, 10)));
    }

    #[test]
    fn test_arity_range() {
        let mut with_default = Parameter::new("b", None, 1);
        with_default.has_default = true;
        let f = callable_with(vec![Parameter::new("a", None, 1), with_default]);
        assert_eq!(f.arity_range(), (1, Some(2)));
        assert!(f.accepts_arity(1));
        assert!(f.accepts_arity(2));
        assert!(!f.accepts_arity(3));

        let mut rest = Parameter::new("rest", None, 1);
        rest.is_variadic = true;
        let g = callable_with(vec![Parameter::new("a", None, 1), rest]);
        assert_eq!(g.arity_range(), (1, None));
        assert!(g.accepts_arity(7));
        assert!(!g.accepts_arity(0));
    }

    #[test]
    fn test_modifier_flags() {
        let m = Modifiers::from_keywords(vec!["public".into()], false, true);
        assert!(m.is_virtual);
        let s = Modifiers::from_keywords(vec!["public".into(), "static".into()], false, true);
        assert!(s.is_static && !s.is_virtual);
        let free = Modifiers::from_keywords(vec![], false, false);
        assert!(!free.is_virtual);
    }

    #[test]
    fn test_annotation_name() {
        assert_eq!(annotation_name("@javax.persistence.Entity"), "Entity");
        assert_eq!(annotation_name("@Table(name = \"orders\")"), "Table");
        assert_eq!(annotation_name("app.route(\"/\")"), "route");
        assert!(has_annotation(&["@Entity".to_string()], "Entity"));
    }

    #[test]
    fn test_signature_key() {
        let sig = Signature::new("com.acme.Order.save", vec!["java.util.List<Item>".into()]);
        assert_eq!(sig.key(), "com.acme.Order.save(java.util.List)");
        assert_eq!(sig.name(), "save");
        assert_eq!(sig.arity(), 1);
    }
}
