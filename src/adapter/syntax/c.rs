//! C language analyzer using tree-sitter.
//!
//! Extraction stops at declarations: functions become top-level callables,
//! structs, unions and enums become types. No call sites are produced, so
//! the analyzer caps out at the symbol-table level.

use std::collections::HashSet;
use std::path::Path;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor};

use super::{LanguageAnalyzer, ParsedFile};
use crate::model::{
    AnalysisLevel, CallableFragment, Field, Language, Modifiers, Parameter, Signature, Span,
    TypeFragment, TypeKind, UnitFragment,
};

/// Tree-sitter query for extracting C declarations.
const DECLARATION_QUERY: &str = r#"
; Function definitions
(function_definition) @function

; Struct definitions (with a body)
(struct_specifier
  name: (type_identifier) @struct_name
  body: (field_declaration_list)
) @struct

; Union definitions
(union_specifier
  name: (type_identifier) @union_name
  body: (field_declaration_list)
) @union

; Enum definitions
(enum_specifier
  name: (type_identifier) @enum_name
  body: (enumerator_list)
) @enum

; typedef struct { ... } Name;
(type_definition
  type: [(struct_specifier) (union_specifier) (enum_specifier)] @typedef_type
  declarator: (type_identifier) @typedef_name
) @typedef
"#;

/// Tree-sitter query for extracting includes.
const IMPORT_QUERY: &str = r#"
; #include <header.h>
(preproc_include
  path: (system_lib_string) @system_include
)

; #include "header.h"
(preproc_include
  path: (string_literal) @local_include
)
"#;

const COMMENT_QUERY: &str = r#"
(comment) @comment
"#;

/// C language analyzer.
pub struct CAnalyzer {
    language: Grammar,
}

impl CAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_c::LANGUAGE.into(),
        }
    }

    fn create_parser(&self) -> anyhow::Result<Parser> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;
        Ok(parser)
    }

    fn extract_declarations(&self, parsed: &ParsedFile, unit: &mut UnitFragment) -> anyhow::Result<()> {
        let query = Query::new(&self.language, DECLARATION_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        let mut seen_positions = HashSet::new();

        while let Some(m) = matches.next() {
            let mut name = None;
            let mut kind = None;
            let mut decl_node = None;
            let mut typedef_type = None;

            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                match capture_name {
                    "struct_name" | "union_name" | "enum_name" | "typedef_name" => {
                        name = Some(parsed.node_text(capture.node).to_string());
                    }
                    "typedef_type" => typedef_type = Some(capture.node),
                    "struct" => (kind, decl_node) = (Some(TypeKind::Struct), Some(capture.node)),
                    "union" => (kind, decl_node) = (Some(TypeKind::Union), Some(capture.node)),
                    "enum" => (kind, decl_node) = (Some(TypeKind::Enum), Some(capture.node)),
                    "typedef" => decl_node = Some(capture.node),
                    "function" => {
                        if seen_positions.insert(capture.node.start_byte()) {
                            if let Some(f) = self.function(parsed, capture.node) {
                                unit.callables.push(f);
                            }
                        }
                    }
                    _ => {}
                }
            }

            // A typedef only introduces a type when the tagged type is anonymous.
            if let Some(spec) = typedef_type {
                if spec.child_by_field_name("name").is_some() || spec.child_by_field_name("body").is_none() {
                    continue;
                }
                kind = Some(match spec.kind() {
                    "union_specifier" => TypeKind::Union,
                    "enum_specifier" => TypeKind::Enum,
                    _ => TypeKind::Struct,
                });
                decl_node = Some(spec);
            }

            if let (Some(name), Some(kind), Some(node)) = (name, kind, decl_node) {
                if !seen_positions.insert(node.start_byte()) {
                    continue;
                }
                unit.types.push(TypeFragment {
                    qualified_name: name.clone(),
                    name,
                    kind,
                    supertypes: Vec::new(),
                    annotations: Vec::new(),
                    modifiers: Vec::new(),
                    fields: node
                        .child_by_field_name("body")
                        .map(|b| self.fields(parsed, b))
                        .unwrap_or_default(),
                    span: Span::from_node(node),
                    enclosing: None,
                });
            }
        }

        unit.types.sort_by_key(|t| t.span.start_byte);
        Ok(())
    }

    fn function(&self, parsed: &ParsedFile, node: Node) -> Option<CallableFragment> {
        let (declarator, pointers) = unwrap_declarator(node.child_by_field_name("declarator")?);
        if declarator.kind() != "function_declarator" {
            return None;
        }
        let name = parsed.field_text(declarator, "declarator")?.to_string();
        let parameters = declarator
            .child_by_field_name("parameters")
            .map(|p| self.parameters(parsed, p))
            .unwrap_or_default();

        let mut keywords = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if matches!(child.kind(), "storage_class_specifier" | "type_qualifier") {
                keywords.push(parsed.node_text(child).to_string());
            }
        }

        let return_type = parsed
            .field_text(node, "type")
            .map(|t| format!("{}{}", t, "*".repeat(pointers)));
        let span = Span::from_node(node);
        Some(CallableFragment {
            owner: None,
            signature: Signature::new(
                name.clone(),
                parameters.iter().map(Parameter::key_type).collect(),
            ),
            name,
            return_type,
            parameters,
            modifiers: Modifiers::from_keywords(keywords, false, false),
            annotations: Vec::new(),
            start_line: span.start_line,
            span,
            call_sites: Vec::new(),
        })
    }

    fn parameters(&self, parsed: &ParsedFile, list: Node) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            let line = param.start_position().row + 1;
            match param.kind() {
                "parameter_declaration" => {
                    let base = parsed.field_text(param, "type").unwrap_or("");
                    let (name, suffix) = match param.child_by_field_name("declarator") {
                        Some(d) => declarator_name(parsed, d),
                        // `f(void)` declares no parameters.
                        None if base == "void" => continue,
                        None => (None, String::new()),
                    };
                    parameters.push(Parameter {
                        name,
                        declared_type: Some(format!("{}{}", base, suffix)),
                        line,
                        span: Some(Span::from_node(param)),
                        has_default: false,
                        is_variadic: false,
                    });
                }
                "variadic_parameter" => parameters.push(Parameter {
                    name: None,
                    declared_type: None,
                    line,
                    span: Some(Span::from_node(param)),
                    has_default: false,
                    is_variadic: true,
                }),
                _ => {}
            }
        }
        parameters
    }

    fn fields(&self, parsed: &ParsedFile, body: Node) -> Vec<Field> {
        let mut fields = Vec::new();
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            let line = member.start_position().row + 1;
            match member.kind() {
                "field_declaration" => {
                    let base = parsed.field_text(member, "type").unwrap_or("");
                    let mut inner = member.walk();
                    for declarator in member.children_by_field_name("declarator", &mut inner) {
                        let (name, suffix) = declarator_name(parsed, declarator);
                        if let Some(name) = name {
                            fields.push(Field {
                                name,
                                declared_type: Some(format!("{}{}", base, suffix)),
                                modifiers: Vec::new(),
                                annotations: Vec::new(),
                                line,
                            });
                        }
                    }
                }
                "enumerator" => {
                    if let Some(name) = parsed.field_text(member, "name") {
                        fields.push(Field {
                            name: name.to_string(),
                            declared_type: None,
                            modifiers: Vec::new(),
                            annotations: Vec::new(),
                            line,
                        });
                    }
                }
                _ => {}
            }
        }
        fields
    }

    fn extract_imports(&self, parsed: &ParsedFile) -> anyhow::Result<Vec<String>> {
        let query = Query::new(&self.language, IMPORT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        let mut imports = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let raw = parsed.node_text(capture.node);
                // <stdio.h> -> stdio.h, "header.h" -> header.h
                let path = raw.trim_matches(|c| c == '<' || c == '>' || c == '"').to_string();
                if !path.is_empty() && !imports.contains(&path) {
                    imports.push(path);
                }
            }
        }
        Ok(imports)
    }

    fn extract_comments(&self, parsed: &ParsedFile, unit: &mut UnitFragment) -> anyhow::Result<()> {
        let query = Query::new(&self.language, COMMENT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        while let Some(m) = matches.next() {
            for capture in m.captures {
                let text = parsed.node_text(capture.node);
                let is_doc = text.starts_with("/**") || text.starts_with("///");
                unit.comments.push(parsed.comment(capture.node, is_doc));
            }
        }
        Ok(())
    }
}

/// Strip pointer declarators, counting the levels removed.
fn unwrap_declarator(mut node: Node) -> (Node, usize) {
    let mut pointers = 0;
    while node.kind() == "pointer_declarator" {
        match node.child_by_field_name("declarator") {
            Some(inner) => {
                pointers += 1;
                node = inner;
            }
            None => break,
        }
    }
    (node, pointers)
}

/// Name and type suffix (`*`, `[]`) of a parameter or field declarator.
fn declarator_name(parsed: &ParsedFile, node: Node) -> (Option<String>, String) {
    let mut suffix = String::new();
    let mut current = node;
    loop {
        match current.kind() {
            "pointer_declarator" => suffix.insert(0, '*'),
            "array_declarator" => suffix.push_str("[]"),
            "identifier" | "field_identifier" => {
                return (Some(parsed.node_text(current).to_string()), suffix)
            }
            _ => return (None, suffix),
        }
        match current.child_by_field_name("declarator") {
            Some(inner) => current = inner,
            None => return (None, suffix),
        }
    }
}

impl Default for CAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for CAnalyzer {
    fn language(&self) -> Language {
        Language::C
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["c", "h"]
    }

    fn max_level(&self) -> AnalysisLevel {
        AnalysisLevel::SymbolTable
    }

    fn parse(&self, path: &Path, source: &[u8]) -> anyhow::Result<ParsedFile> {
        let mut parser = self.create_parser()?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("failed to parse C source: {}", path.display()))?;

        Ok(ParsedFile {
            tree,
            source: source.to_vec(),
            path: path.to_string_lossy().to_string(),
        })
    }

    fn extract_unit(
        &self,
        parsed: &ParsedFile,
        _level: AnalysisLevel,
    ) -> anyhow::Result<UnitFragment> {
        let mut unit = UnitFragment::new(parsed.path.clone(), Language::C);
        unit.imports = self.extract_imports(parsed)?;
        self.extract_declarations(parsed, &mut unit)?;
        self.extract_comments(parsed, &mut unit)?;
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str) -> UnitFragment {
        let analyzer = CAnalyzer::new();
        let parsed = analyzer
            .parse(Path::new("shapes.c"), source.as_bytes())
            .unwrap();
        analyzer.extract_unit(&parsed, AnalysisLevel::SymbolTable).unwrap()
    }

    #[test]
    fn test_extract_includes() {
        let unit = extract(
            r#"
#include <stdio.h>
#include "shapes.h"

int main(void) {
    return 0;
}
"#,
        );
        assert_eq!(unit.imports, vec!["stdio.h", "shapes.h"]);
    }

    #[test]
    fn test_extract_declarations() {
        let unit = extract(
            r#"
/** A point in the plane. */
struct Point {
    int x;
    int *y;
};

typedef struct {
    double w, h;
} Size;

enum Color { RED, GREEN };

static char *name_of(struct Point *p, int count, ...) {
    return 0;
}

int area(void) { return 0; }
"#,
        );
        let names: Vec<(&str, TypeKind)> =
            unit.types.iter().map(|t| (t.name.as_str(), t.kind)).collect();
        assert_eq!(
            names,
            vec![("Point", TypeKind::Struct), ("Size", TypeKind::Struct), ("Color", TypeKind::Enum)]
        );
        assert_eq!(unit.types[0].fields[1].declared_type.as_deref(), Some("int*"));
        assert_eq!(unit.types[1].fields.len(), 2);
        assert_eq!(unit.types[2].fields[1].name, "GREEN");

        let name_of = &unit.callables[0];
        assert_eq!(name_of.name, "name_of");
        assert_eq!(name_of.return_type.as_deref(), Some("char*"));
        assert!(name_of.modifiers.is_static);
        assert!(!name_of.modifiers.is_virtual);
        assert_eq!(name_of.parameters.len(), 3);
        assert!(name_of.parameters[2].is_variadic);
        assert_eq!(name_of.signature.key(), "name_of(structPoint*,int,_)");

        let area = &unit.callables[1];
        assert!(area.parameters.is_empty());
        assert!(unit.comments[0].is_doc);
    }
}
