//! Java language analyzer using tree-sitter.

use std::path::Path;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor};

use super::{looks_like_type, LanguageAnalyzer, ParsedFile, TypeScope};
use crate::model::signature::{normalize_type, simple_type};
use crate::model::{
    AnalysisLevel, CallSiteFragment, CallableFragment, CalleeGuess, Field, Language, Modifiers,
    Parameter, Signature, Span, TypeFragment, TypeKind, UnitFragment,
};

/// Tree-sitter query for package declaration.
const PACKAGE_QUERY: &str = r#"
(package_declaration
  [(scoped_identifier) (identifier)] @package_name
)
"#;

/// Tree-sitter query for extracting imports.
const IMPORT_QUERY: &str = r#"
(import_declaration) @import
"#;

const COMMENT_QUERY: &str = r#"
(line_comment) @line
(block_comment) @block
"#;

/// Declaration kinds that introduce a type.
const TYPE_KINDS: &[&str] = &[
    "class_declaration",
    "interface_declaration",
    "enum_declaration",
    "record_declaration",
    "annotation_type_declaration",
];

pub struct JavaAnalyzer {
    language: Grammar,
}

/// Enclosing type while walking declarations.
struct TypeContext {
    index: usize,
    name: String,
    qualified_name: String,
    superclass: Option<String>,
    fields: TypeScope,
}

impl JavaAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_java::LANGUAGE.into(),
        }
    }

    fn create_parser(&self) -> anyhow::Result<Parser> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;
        Ok(parser)
    }

    fn extract_package(&self, parsed: &ParsedFile) -> Option<String> {
        let query = Query::new(&self.language, PACKAGE_QUERY).ok()?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        if let Some(m) = matches.next() {
            for capture in m.captures {
                let name = query.capture_names()[capture.index as usize];
                if name == "package_name" {
                    return Some(parsed.node_text(capture.node).to_string());
                }
            }
        }
        None
    }

    fn extract_imports(&self, parsed: &ParsedFile) -> anyhow::Result<Vec<String>> {
        let query = Query::new(&self.language, IMPORT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        let mut imports = Vec::new();
        while let Some(m) = matches.next() {
            for capture in m.captures {
                let text = parsed.node_text(capture.node);
                let path = text
                    .trim()
                    .trim_start_matches("import")
                    .trim_end_matches(';')
                    .trim();
                let path = path.strip_prefix("static ").unwrap_or(path).trim();
                let path: String = path.chars().filter(|c| !c.is_whitespace()).collect();
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
                let is_doc = query.capture_names()[capture.index as usize] == "block"
                    && parsed.node_text(capture.node).starts_with("/**");
                unit.comments.push(parsed.comment(capture.node, is_doc));
            }
        }
        Ok(())
    }
}

impl Default for JavaAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for JavaAnalyzer {
    fn language(&self) -> Language {
        Language::Java
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["java"]
    }

    fn max_level(&self) -> AnalysisLevel {
        AnalysisLevel::CallGraphInference
    }

    fn parse(&self, path: &Path, source: &[u8]) -> anyhow::Result<ParsedFile> {
        let mut parser = self.create_parser()?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("failed to parse Java source: {}", path.display()))?;

        Ok(ParsedFile {
            tree,
            source: source.to_vec(),
            path: path.to_string_lossy().to_string(),
        })
    }

    fn extract_unit(
        &self,
        parsed: &ParsedFile,
        level: AnalysisLevel,
    ) -> anyhow::Result<UnitFragment> {
        let mut unit = UnitFragment::new(parsed.path.clone(), Language::Java);
        unit.package = self.extract_package(parsed);
        unit.imports = self.extract_imports(parsed)?;

        let mut walker = DeclarationWalker {
            parsed,
            unit: &mut unit,
            with_calls: level >= AnalysisLevel::CallGraph,
            stack: Vec::new(),
        };
        let root = parsed.tree.root_node();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if TYPE_KINDS.contains(&child.kind()) {
                walker.visit_type(child);
            }
        }

        self.extract_comments(parsed, &mut unit)?;
        Ok(unit)
    }
}

struct DeclarationWalker<'a, 'u> {
    parsed: &'a ParsedFile,
    unit: &'u mut UnitFragment,
    with_calls: bool,
    stack: Vec<TypeContext>,
}

impl<'a, 'u> DeclarationWalker<'a, 'u> {
    fn text(&self, node: Node) -> &'a str {
        self.parsed.node_text(node)
    }

    fn visit_type(&mut self, node: Node) {
        let Some(name) = self.parsed.field_text(node, "name").map(str::to_string) else {
            return;
        };
        let qualified_name = match self.stack.last() {
            Some(outer) => format!("{}.{}", outer.qualified_name, name),
            None => match &self.unit.package {
                Some(pkg) => format!("{}.{}", pkg, name),
                None => name.clone(),
            },
        };
        let kind = match node.kind() {
            "interface_declaration" => TypeKind::Interface,
            "enum_declaration" => TypeKind::Enum,
            "record_declaration" => TypeKind::Record,
            "annotation_type_declaration" => TypeKind::Annotation,
            _ => TypeKind::Class,
        };
        let (modifiers, annotations) = self.modifiers(node);

        let mut superclass = None;
        let mut supertypes = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            match child.kind() {
                "superclass" => {
                    let found = self.type_names(child);
                    superclass = found.first().cloned();
                    supertypes.extend(found);
                }
                "super_interfaces" | "extends_interfaces" => {
                    supertypes.extend(self.type_names(child));
                }
                _ => {}
            }
        }

        let body = node.child_by_field_name("body");
        let mut fields = body.map(|b| self.fields(b)).unwrap_or_default();
        if let Some(components) = node.child_by_field_name("parameters") {
            fields.extend(self.parameters(components).into_iter().filter_map(|p| {
                Some(Field {
                    name: p.name?,
                    declared_type: p.declared_type,
                    modifiers: vec!["private".to_string(), "final".to_string()],
                    annotations: Vec::new(),
                    line: p.line,
                })
            }));
        }

        let mut scope = TypeScope::default();
        for field in &fields {
            if let Some(t) = &field.declared_type {
                scope.bind(field.name.clone(), t.clone());
            }
        }

        let index = self.unit.types.len();
        self.unit.types.push(TypeFragment {
            name: name.clone(),
            qualified_name: qualified_name.clone(),
            kind,
            supertypes,
            annotations,
            modifiers,
            fields,
            span: Span::from_node(node),
            enclosing: self.stack.last().map(|t| t.index),
        });

        self.stack.push(TypeContext {
            index,
            name,
            qualified_name,
            superclass,
            fields: scope,
        });
        if let Some(body) = body {
            self.visit_members(body);
        }
        self.stack.pop();
    }

    fn visit_members(&mut self, body: Node) {
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            match member.kind() {
                "method_declaration" | "constructor_declaration" | "compact_constructor_declaration" => {
                    self.visit_callable(member)
                }
                "enum_body_declarations" => self.visit_members(member),
                kind if TYPE_KINDS.contains(&kind) => self.visit_type(member),
                _ => {}
            }
        }
    }

    fn visit_callable(&mut self, node: Node) {
        let Some(owner) = self.stack.last() else {
            return;
        };
        let owner_index = owner.index;
        let owner_qn = owner.qualified_name.clone();
        let is_constructor = node.kind() != "method_declaration";
        let name = if is_constructor {
            owner.name.clone()
        } else {
            match self.parsed.field_text(node, "name") {
                Some(n) => n.to_string(),
                None => return,
            }
        };

        let (keywords, annotations) = self.modifiers(node);
        let parameters = match node.child_by_field_name("parameters") {
            Some(p) => self.parameters(p),
            // Compact record constructors take the record components.
            None => Vec::new(),
        };
        let return_type = if is_constructor {
            None
        } else {
            self.parsed.field_text(node, "type").map(str::to_string)
        };

        let mut call_sites = Vec::new();
        if self.with_calls {
            if let Some(body) = node.child_by_field_name("body") {
                let mut scope = TypeScope::default();
                for p in &parameters {
                    if let (Some(n), Some(t)) = (&p.name, &p.declared_type) {
                        scope.bind(n.clone(), t.clone());
                    }
                }
                self.collect_calls(body, &mut scope, &mut call_sites);
            }
        }

        let span = Span::from_node(node);
        self.unit.callables.push(CallableFragment {
            owner: Some(owner_index),
            signature: Signature::new(
                format!("{}.{}", owner_qn, name),
                parameters.iter().map(Parameter::key_type).collect(),
            ),
            name,
            return_type,
            parameters,
            modifiers: Modifiers::from_keywords(keywords, is_constructor, true),
            annotations,
            start_line: span.start_line,
            span,
            call_sites,
        });
    }

    /// Modifier keywords and annotations (without `@`) of a declaration.
    fn modifiers(&self, node: Node) -> (Vec<String>, Vec<String>) {
        let mut keywords = Vec::new();
        let mut annotations = Vec::new();
        let mut cursor = node.walk();
        let Some(mods) = node.children(&mut cursor).find(|c| c.kind() == "modifiers") else {
            return (keywords, annotations);
        };
        let mut cursor = mods.walk();
        for child in mods.children(&mut cursor) {
            match child.kind() {
                "marker_annotation" | "annotation" => {
                    annotations.push(self.text(child).trim_start_matches('@').to_string())
                }
                "line_comment" | "block_comment" => {}
                _ => keywords.push(self.text(child).to_string()),
            }
        }
        (keywords, annotations)
    }

    /// Type names listed under `extends`/`implements`.
    fn type_names(&self, node: Node) -> Vec<String> {
        let mut names = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "type_list" {
                names.extend(self.type_names(child));
            } else {
                names.push(self.text(child).to_string());
            }
        }
        names
    }

    fn fields(&self, body: Node) -> Vec<Field> {
        let mut fields = Vec::new();
        let mut cursor = body.walk();
        for member in body.named_children(&mut cursor) {
            if !matches!(member.kind(), "field_declaration" | "constant_declaration") {
                continue;
            }
            let (modifiers, annotations) = self.modifiers(member);
            let declared_type = self.parsed.field_text(member, "type").map(str::to_string);
            let mut inner = member.walk();
            for declarator in member.children_by_field_name("declarator", &mut inner) {
                if let Some(name) = self.parsed.field_text(declarator, "name") {
                    fields.push(Field {
                        name: name.to_string(),
                        declared_type: declared_type.clone(),
                        modifiers: modifiers.clone(),
                        annotations: annotations.clone(),
                        line: declarator.start_position().row + 1,
                    });
                }
            }
        }
        fields
    }

    fn parameters(&self, list: Node) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            let line = param.start_position().row + 1;
            match param.kind() {
                "formal_parameter" => {
                    let mut declared_type =
                        self.parsed.field_text(param, "type").map(str::to_string);
                    if let (Some(t), Some(dims)) =
                        (declared_type.as_mut(), param.child_by_field_name("dimensions"))
                    {
                        t.push_str(self.text(dims));
                    }
                    parameters.push(Parameter {
                        name: self.parsed.field_text(param, "name").map(str::to_string),
                        declared_type,
                        line,
                        span: Some(Span::from_node(param)),
                        has_default: false,
                        is_variadic: false,
                    });
                }
                "spread_parameter" => {
                    let mut declared_type = None;
                    let mut name = None;
                    let mut inner = param.walk();
                    for child in param.named_children(&mut inner) {
                        match child.kind() {
                            "modifiers" => {}
                            "variable_declarator" => {
                                name = self.parsed.field_text(child, "name").map(str::to_string)
                            }
                            _ if declared_type.is_none() => {
                                declared_type = Some(format!("{}...", self.text(child)))
                            }
                            _ => {}
                        }
                    }
                    parameters.push(Parameter {
                        name,
                        declared_type,
                        line,
                        span: Some(Span::from_node(param)),
                        has_default: false,
                        is_variadic: true,
                    });
                }
                _ => {}
            }
        }
        parameters
    }

    fn collect_calls(&self, node: Node, scope: &mut TypeScope, sites: &mut Vec<CallSiteFragment>) {
        match node.kind() {
            // Anonymous and local class bodies belong to other callables.
            "class_body" => return,
            kind if TYPE_KINDS.contains(&kind) => return,
            "local_variable_declaration" => {
                let declared = self.parsed.field_text(node, "type").unwrap_or("");
                let mut cursor = node.walk();
                for declarator in node.children_by_field_name("declarator", &mut cursor) {
                    let Some(name) = self.parsed.field_text(declarator, "name") else {
                        continue;
                    };
                    let bound = if declared == "var" {
                        declarator
                            .child_by_field_name("value")
                            .and_then(|v| self.expr_type(v, scope))
                    } else {
                        Some(declared.to_string())
                    };
                    if let Some(t) = bound {
                        scope.bind(name, t);
                    }
                }
            }
            "enhanced_for_statement" | "resource" => {
                if let (Some(t), Some(n)) = (
                    self.parsed.field_text(node, "type"),
                    self.parsed.field_text(node, "name"),
                ) {
                    if t != "var" {
                        scope.bind(n, t);
                    }
                }
            }
            "method_invocation" => {
                if let Some(site) = self.method_call(node, scope) {
                    sites.push(site);
                }
            }
            "object_creation_expression" => {
                if let Some(site) = self.object_creation(node, scope) {
                    sites.push(site);
                }
            }
            "explicit_constructor_invocation" => {
                if let Some(site) = self.explicit_constructor(node, scope) {
                    sites.push(site);
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_calls(child, scope, sites);
        }
    }

    fn method_call(&self, node: Node, scope: &TypeScope) -> Option<CallSiteFragment> {
        let method_name = self.parsed.field_text(node, "name")?.to_string();
        let object = node.child_by_field_name("object");
        let receiver_type = object.and_then(|o| {
            self.expr_type(o, scope).or_else(|| {
                // `Math.max(..)`: a capitalised bare receiver names a type.
                let text = self.text(o);
                (o.kind() == "identifier" && looks_like_type(text)).then(|| text.to_string())
            })
        });
        let (arguments, argument_types) = self.arguments(node, scope);
        Some(CallSiteFragment {
            guess: CalleeGuess {
                method_name,
                receiver_expr: object.map(|o| self.text(o).to_string()),
                receiver_type,
                argument_types,
                signature: None,
                is_constructor_call: false,
            },
            arguments,
            line: node.start_position().row + 1,
            span: Some(Span::from_node(node)),
        })
    }

    fn object_creation(&self, node: Node, scope: &TypeScope) -> Option<CallSiteFragment> {
        let type_text = self.parsed.field_text(node, "type")?;
        let (arguments, argument_types) = self.arguments(node, scope);
        Some(CallSiteFragment {
            guess: CalleeGuess {
                method_name: simple_type(type_text),
                receiver_expr: None,
                receiver_type: Some(normalize_type(type_text)),
                argument_types,
                signature: None,
                is_constructor_call: true,
            },
            arguments,
            line: node.start_position().row + 1,
            span: Some(Span::from_node(node)),
        })
    }

    /// `this(...)` or `super(...)` inside a constructor.
    fn explicit_constructor(&self, node: Node, scope: &TypeScope) -> Option<CallSiteFragment> {
        let current = self.stack.last()?;
        let target = match node.child_by_field_name("constructor")?.kind() {
            "this" => current.qualified_name.clone(),
            "super" => current.superclass.clone()?,
            _ => return None,
        };
        let (arguments, argument_types) = self.arguments(node, scope);
        Some(CallSiteFragment {
            guess: CalleeGuess {
                method_name: simple_type(&target),
                receiver_expr: None,
                receiver_type: Some(normalize_type(&target)),
                argument_types,
                signature: None,
                is_constructor_call: true,
            },
            arguments,
            line: node.start_position().row + 1,
            span: Some(Span::from_node(node)),
        })
    }

    fn arguments(&self, node: Node, scope: &TypeScope) -> (Vec<String>, Vec<Option<String>>) {
        let mut arguments = Vec::new();
        let mut types = Vec::new();
        if let Some(list) = node.child_by_field_name("arguments") {
            let mut cursor = list.walk();
            for arg in list.named_children(&mut cursor) {
                if matches!(arg.kind(), "line_comment" | "block_comment") {
                    continue;
                }
                arguments.push(self.text(arg).to_string());
                types.push(self.expr_type(arg, scope));
            }
        }
        (arguments, types)
    }

    /// Static type of an expression, when it is evident locally.
    fn expr_type(&self, expr: Node, scope: &TypeScope) -> Option<String> {
        let text = self.text(expr);
        match expr.kind() {
            "this" => self.stack.last().map(|t| t.qualified_name.clone()),
            "super" => self.stack.last().and_then(|t| t.superclass.clone()),
            "identifier" => scope
                .lookup(text)
                .or_else(|| self.field_type(text))
                .map(str::to_string),
            "field_access" => {
                let object = expr.child_by_field_name("object")?;
                let field = self.parsed.field_text(expr, "field")?;
                (object.kind() == "this")
                    .then(|| self.field_type(field).map(str::to_string))
                    .flatten()
            }
            "object_creation_expression" | "cast_expression" => {
                self.parsed.field_text(expr, "type").map(str::to_string)
            }
            "array_creation_expression" => self
                .parsed
                .field_text(expr, "type")
                .map(|t| format!("{}[]", t)),
            "parenthesized_expression" => expr
                .named_child(0)
                .and_then(|inner| self.expr_type(inner, scope)),
            "string_literal" | "text_block" => Some("String".to_string()),
            "character_literal" => Some("char".to_string()),
            "true" | "false" => Some("boolean".to_string()),
            "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal"
            | "binary_integer_literal" => Some(
                if text.ends_with(['l', 'L']) { "long" } else { "int" }.to_string(),
            ),
            "decimal_floating_point_literal" | "hex_floating_point_literal" => Some(
                if text.ends_with(['f', 'F']) { "float" } else { "double" }.to_string(),
            ),
            _ => None,
        }
    }

    /// Field type visible from the current type or its enclosing types.
    fn field_type(&self, name: &str) -> Option<&str> {
        self.stack.iter().rev().find_map(|t| t.fields.lookup(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(source: &str, level: AnalysisLevel) -> UnitFragment {
        let analyzer = JavaAnalyzer::new();
        let parsed = analyzer
            .parse(Path::new("com/acme/Shop.java"), source.as_bytes())
            .unwrap();
        analyzer.extract_unit(&parsed, level).unwrap()
    }

    const SHOP: &str = r#"
package com.acme;

import java.util.List;
import static java.lang.Math.max;

/** A persisted order. */
@Entity
public class Order extends BaseEntity implements Comparable<Order> {
    private long id;

    public Order(long id) {
        super(id);
        this.id = id;
    }

    /** Persist this order. */
    public void save() {}

    public static Order of(String code, int... parts) { return new Order(1L); }

    static class Line {}
}

class OrderService {
    private Order cached;

    public void process(Order order) {
        // save it
        order.save();
        cached.save();
        Order other = Order.of("x", 1, 2);
        var fresh = new Order(2L);
        fresh.save();
        helper();
    }

    private void helper() {}
}
"#;

    #[test]
    fn test_extract_types() {
        let unit = extract(SHOP, AnalysisLevel::SymbolTable);
        assert_eq!(unit.package.as_deref(), Some("com.acme"));
        assert_eq!(unit.imports, vec!["java.util.List", "java.lang.Math.max"]);

        let names: Vec<&str> = unit.types.iter().map(|t| t.qualified_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["com.acme.Order", "com.acme.Order.Line", "com.acme.OrderService"]
        );
        let order = &unit.types[0];
        assert_eq!(order.annotations, vec!["Entity"]);
        assert_eq!(order.supertypes, vec!["BaseEntity", "Comparable<Order>"]);
        assert_eq!(order.fields[0].name, "id");
        assert_eq!(unit.types[1].enclosing, Some(0));
    }

    #[test]
    fn test_extract_callables() {
        let unit = extract(SHOP, AnalysisLevel::SymbolTable);
        let keys: Vec<String> = unit.callables.iter().map(|c| c.signature.key()).collect();
        assert!(keys.contains(&"com.acme.Order.Order(long)".to_string()));
        assert!(keys.contains(&"com.acme.Order.save()".to_string()));
        assert!(keys.contains(&"com.acme.Order.of(String,int[])".to_string()));
        assert!(keys.contains(&"com.acme.OrderService.process(Order)".to_string()));

        let of = unit.callables.iter().find(|c| c.name == "of").unwrap();
        assert!(of.modifiers.is_static);
        assert!(of.parameters[1].is_variadic);
        let ctor = unit.callables.iter().find(|c| c.modifiers.is_constructor).unwrap();
        assert_eq!(ctor.name, "Order");
        // No call sites below the call-graph level.
        assert!(unit.callables.iter().all(|c| c.call_sites.is_empty()));
    }

    #[test]
    fn test_extract_call_sites_with_receiver_types() {
        let unit = extract(SHOP, AnalysisLevel::CallGraph);
        let process = unit.callables.iter().find(|c| c.name == "process").unwrap();
        let guesses: Vec<(&str, Option<&str>)> = process
            .call_sites
            .iter()
            .map(|s| (s.guess.method_name.as_str(), s.guess.receiver_type.as_deref()))
            .collect();
        assert_eq!(
            guesses,
            vec![
                ("save", Some("Order")),
                ("save", Some("Order")),
                ("of", Some("Order")),
                ("Order", Some("Order")),
                ("save", Some("Order")),
                ("helper", None),
            ]
        );
        let of_call = &process.call_sites[2];
        assert_eq!(of_call.arguments.len(), 3);
        assert_eq!(
            of_call.guess.argument_types,
            vec![Some("String".to_string()), Some("int".to_string()), Some("int".to_string())]
        );
        assert!(process.call_sites[3].guess.is_constructor_call);

        let ctor = unit.callables.iter().find(|c| c.modifiers.is_constructor).unwrap();
        assert_eq!(ctor.call_sites[0].guess.receiver_type.as_deref(), Some("BaseEntity"));
        assert!(ctor.call_sites[0].guess.is_constructor_call);
    }

    #[test]
    fn test_extract_comments() {
        let unit = extract(SHOP, AnalysisLevel::SymbolTable);
        let docs: Vec<&str> = unit
            .comments
            .iter()
            .filter(|c| c.is_doc)
            .map(|c| c.text.as_str())
            .collect();
        assert_eq!(docs, vec!["/** A persisted order. */", "/** Persist this order. */"]);
        assert!(unit.comments.iter().any(|c| !c.is_doc && c.text == "// save it"));
    }
}
