//! Python language analyzer using tree-sitter.

use std::path::Path;

use streaming_iterator::StreamingIterator;
use tree_sitter::{Language as Grammar, Node, Parser, Query, QueryCursor};

use super::{looks_like_type, LanguageAnalyzer, ParsedFile, TypeScope};
use crate::model::{
    annotation_name, AnalysisLevel, CallSiteFragment, CallableFragment, CalleeGuess,
    CommentFragment, Field, Language, LocalOwner, Modifiers, Parameter, Signature, Span,
    TypeFragment, TypeKind, UnitFragment,
};

const COMMENT_QUERY: &str = r#"
(comment) @comment
"#;

pub struct PythonAnalyzer {
    language: Grammar,
}

impl PythonAnalyzer {
    pub fn new() -> Self {
        Self {
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    fn create_parser(&self) -> anyhow::Result<Parser> {
        let mut parser = Parser::new();
        parser.set_language(&self.language)?;
        Ok(parser)
    }

    fn extract_imports(&self, parsed: &ParsedFile) -> Vec<String> {
        let root = parsed.tree.root_node();
        let mut imports = Vec::new();
        let mut cursor = root.walk();
        for stmt in root.named_children(&mut cursor) {
            let module = match stmt.kind() {
                "import_statement" => None,
                "import_from_statement" => parsed.field_text(stmt, "module_name"),
                _ => continue,
            };
            let mut inner = stmt.walk();
            for name in stmt.children_by_field_name("name", &mut inner) {
                let name_text = if name.kind() == "aliased_import" {
                    parsed.field_text(name, "name").unwrap_or("")
                } else {
                    parsed.node_text(name)
                };
                let path = match module {
                    Some(m) => format!("{}.{}", m, name_text),
                    None => name_text.to_string(),
                };
                if !name_text.is_empty() && !imports.contains(&path) {
                    imports.push(path);
                }
            }
            if let (Some(m), true) = (module, parsed.node_text(stmt).trim_end().ends_with('*')) {
                imports.push(format!("{}.*", m));
            }
        }
        imports
    }

    fn extract_comments(&self, parsed: &ParsedFile, unit: &mut UnitFragment) -> anyhow::Result<()> {
        let query = Query::new(&self.language, COMMENT_QUERY)?;
        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(&query, parsed.tree.root_node(), &parsed.source[..]);

        while let Some(m) = matches.next() {
            for capture in m.captures {
                unit.comments.push(parsed.comment(capture.node, false));
            }
        }
        Ok(())
    }
}

impl Default for PythonAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageAnalyzer for PythonAnalyzer {
    fn language(&self) -> Language {
        Language::Python
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py"]
    }

    fn max_level(&self) -> AnalysisLevel {
        AnalysisLevel::CallGraphInference
    }

    fn parse(&self, path: &Path, source: &[u8]) -> anyhow::Result<ParsedFile> {
        let mut parser = self.create_parser()?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| anyhow::anyhow!("failed to parse Python source: {}", path.display()))?;

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
        let module = module_name(&parsed.path);
        let mut unit = UnitFragment::new(parsed.path.clone(), Language::Python);
        unit.package = Some(module.clone());
        unit.imports = self.extract_imports(parsed);

        let root = parsed.tree.root_node();
        let mut walker = ScopeWalker {
            parsed,
            unit: &mut unit,
            with_calls: level >= AnalysisLevel::CallGraph,
            classes: Vec::new(),
            class_index: Vec::new(),
        };
        walker.docstring(root, LocalOwner::Unit);
        walker.visit_block(root, &module, false);

        self.extract_comments(parsed, &mut unit)?;
        Ok(unit)
    }
}

/// Dotted module name of a file path (`pkg/orders.py` -> `pkg.orders`).
pub fn module_name(path: &str) -> String {
    let trimmed = path.trim_start_matches("./");
    let stem = trimmed.strip_suffix(".py").unwrap_or(trimmed);
    let dotted = stem.replace(['/', '\\'], ".");
    match dotted.strip_suffix(".__init__") {
        Some(package) => package.to_string(),
        None => dotted,
    }
}

struct ClassContext {
    qualified_name: String,
    superclass: Option<String>,
    attributes: TypeScope,
}

struct ScopeWalker<'a, 'u> {
    parsed: &'a ParsedFile,
    unit: &'u mut UnitFragment,
    with_calls: bool,
    classes: Vec<ClassContext>,
    /// Local indices of the classes whose bodies are being visited.
    class_index: Vec<usize>,
}

impl<'a, 'u> ScopeWalker<'a, 'u> {
    fn text(&self, node: Node) -> &'a str {
        self.parsed.node_text(node)
    }

    /// Visit definitions directly inside a module, class or function body.
    fn visit_block(&mut self, block: Node, prefix: &str, in_class: bool) {
        let mut cursor = block.walk();
        let statements: Vec<Node> = block.named_children(&mut cursor).collect();
        for stmt in statements {
            self.visit_definition(stmt, Vec::new(), prefix, in_class);
        }
    }

    fn visit_definition(&mut self, node: Node, decorators: Vec<String>, prefix: &str, in_class: bool) {
        match node.kind() {
            "class_definition" => self.visit_class(node, decorators, prefix),
            "function_definition" => self.visit_function(node, decorators, prefix, in_class),
            "decorated_definition" => {
                let mut cursor = node.walk();
                let decorators: Vec<String> = node
                    .named_children(&mut cursor)
                    .filter(|c| c.kind() == "decorator")
                    .map(|c| self.text(c).trim().trim_start_matches('@').trim().to_string())
                    .collect();
                if let Some(def) = node.child_by_field_name("definition") {
                    self.visit_definition(def, decorators, prefix, in_class);
                }
            }
            _ => {}
        }
    }

    fn visit_class(&mut self, node: Node, decorators: Vec<String>, prefix: &str) {
        let Some(name) = self.parsed.field_text(node, "name") else {
            return;
        };
        let qualified_name = format!("{}.{}", prefix, name);

        let mut supertypes = Vec::new();
        if let Some(list) = node.child_by_field_name("superclasses") {
            let mut cursor = list.walk();
            for arg in list.named_children(&mut cursor) {
                if !matches!(arg.kind(), "keyword_argument" | "comment") {
                    supertypes.push(self.text(arg).to_string());
                }
            }
        }

        let body = node.child_by_field_name("body");
        let fields = body.map(|b| self.class_fields(b)).unwrap_or_default();
        let mut attributes = TypeScope::default();
        for field in &fields {
            if let Some(t) = &field.declared_type {
                attributes.bind(field.name.clone(), t.clone());
            }
        }

        let index = self.unit.types.len();
        self.unit.types.push(TypeFragment {
            name: name.to_string(),
            qualified_name: qualified_name.clone(),
            kind: TypeKind::Class,
            supertypes: supertypes.clone(),
            annotations: decorators,
            modifiers: Vec::new(),
            fields,
            span: Span::from_node(node),
            enclosing: self.enclosing_type(),
        });

        if let Some(body) = body {
            self.docstring(body, LocalOwner::Type(index));
            self.classes.push(ClassContext {
                qualified_name: qualified_name.clone(),
                superclass: supertypes.into_iter().next(),
                attributes,
            });
            self.class_index.push(index);
            self.visit_block(body, &qualified_name, true);
            self.class_index.pop();
            self.classes.pop();
        }
    }

    fn enclosing_type(&self) -> Option<usize> {
        self.class_index.last().copied()
    }

    fn visit_function(&mut self, node: Node, decorators: Vec<String>, prefix: &str, in_class: bool) {
        let Some(name) = self.parsed.field_text(node, "name") else {
            return;
        };
        let qualified_name = format!("{}.{}", prefix, name);
        let has = |d: &str| decorators.iter().any(|x| annotation_name(x) == d);
        let is_static = in_class && has("staticmethod");
        let is_abstract = has("abstractmethod");
        let is_constructor = in_class && name == "__init__";

        let mut parameters = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        if in_class && !is_static {
            if let Some(first) = parameters.first() {
                if matches!(first.name.as_deref(), Some("self" | "cls")) {
                    parameters.remove(0);
                }
            }
        }

        let mut call_sites = Vec::new();
        let body = node.child_by_field_name("body");
        if let (true, Some(body)) = (self.with_calls, body) {
            let mut scope = TypeScope::default();
            for p in &parameters {
                if let (Some(n), Some(t)) = (&p.name, &p.declared_type) {
                    scope.bind(n.clone(), t.clone());
                }
            }
            self.collect_calls(body, &mut scope, in_class, &mut call_sites);
        }

        let keywords: Vec<String> = decorators
            .iter()
            .map(|d| annotation_name(d).to_string())
            .filter(|d| matches!(d.as_str(), "staticmethod" | "classmethod" | "abstractmethod"))
            .collect();
        let span = Span::from_node(node);
        let local = self.unit.callables.len();
        self.unit.callables.push(CallableFragment {
            owner: if in_class { self.enclosing_type() } else { None },
            name: name.to_string(),
            signature: Signature::new(
                qualified_name.clone(),
                parameters.iter().map(Parameter::key_type).collect(),
            ),
            return_type: self.parsed.field_text(node, "return_type").map(str::to_string),
            parameters,
            modifiers: Modifiers {
                keywords,
                is_static,
                is_abstract,
                is_constructor,
                is_virtual: in_class && !is_static && !is_constructor,
            },
            annotations: decorators,
            start_line: span.start_line,
            span,
            call_sites,
        });

        if let Some(body) = body {
            self.docstring(body, LocalOwner::Callable(local));
            // Nested definitions live in the function's namespace but are
            // never methods of the enclosing class.
            let saved = std::mem::take(&mut self.class_index);
            self.visit_block(body, &qualified_name, false);
            self.class_index = saved;
        }
    }

    /// Record a leading string literal of a body as a doc comment.
    fn docstring(&mut self, body: Node, owner: LocalOwner) {
        let Some(first) = body.named_child(0) else {
            return;
        };
        if first.kind() != "expression_statement" {
            return;
        }
        let Some(string) = first.named_child(0).filter(|s| s.kind() == "string") else {
            return;
        };
        self.unit.comments.push(CommentFragment {
            text: self.text(string).to_string(),
            span: Span::from_node(string),
            is_doc: true,
            owner: Some(owner),
        });
    }

    /// Class-level assignments (`name: str = ""`, `count = 0`).
    fn class_fields(&self, body: Node) -> Vec<Field> {
        let mut fields = Vec::new();
        let mut cursor = body.walk();
        for stmt in body.named_children(&mut cursor) {
            if stmt.kind() != "expression_statement" {
                continue;
            }
            let Some(assignment) = stmt.named_child(0).filter(|a| a.kind() == "assignment") else {
                continue;
            };
            let Some(left) = assignment.child_by_field_name("left") else {
                continue;
            };
            if left.kind() != "identifier" {
                continue;
            }
            let declared_type = self
                .parsed
                .field_text(assignment, "type")
                .map(str::to_string)
                .or_else(|| {
                    assignment
                        .child_by_field_name("right")
                        .and_then(|r| self.expr_type(r, &TypeScope::default()))
                });
            fields.push(Field {
                name: self.text(left).to_string(),
                declared_type,
                modifiers: Vec::new(),
                annotations: Vec::new(),
                line: assignment.start_position().row + 1,
            });
        }
        fields
    }

    fn parameters(&self, list: Node) -> Vec<Parameter> {
        let mut parameters = Vec::new();
        let mut cursor = list.walk();
        for param in list.named_children(&mut cursor) {
            let mut p = Parameter {
                name: None,
                declared_type: None,
                line: param.start_position().row + 1,
                span: Some(Span::from_node(param)),
                has_default: false,
                is_variadic: false,
            };
            match param.kind() {
                "identifier" => p.name = Some(self.text(param).to_string()),
                "typed_parameter" => {
                    let Some(inner) = param.named_child(0) else {
                        continue;
                    };
                    self.splat_name(inner, &mut p);
                    p.declared_type = self.parsed.field_text(param, "type").map(str::to_string);
                }
                "default_parameter" | "typed_default_parameter" => {
                    p.name = self.parsed.field_text(param, "name").map(str::to_string);
                    p.declared_type = self.parsed.field_text(param, "type").map(str::to_string);
                    p.has_default = true;
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => self.splat_name(param, &mut p),
                _ => continue,
            }
            parameters.push(p);
        }
        parameters
    }

    fn splat_name(&self, node: Node, p: &mut Parameter) {
        match node.kind() {
            "list_splat_pattern" | "dictionary_splat_pattern" => {
                p.is_variadic = true;
                p.name = node.named_child(0).map(|n| self.text(n).to_string());
            }
            _ => p.name = Some(self.text(node).to_string()),
        }
    }

    fn collect_calls(
        &self,
        node: Node,
        scope: &mut TypeScope,
        in_class: bool,
        sites: &mut Vec<CallSiteFragment>,
    ) {
        match node.kind() {
            "function_definition" | "class_definition" | "decorated_definition" => return,
            "assignment" => {
                if let Some(left) = node.child_by_field_name("left").filter(|l| l.kind() == "identifier") {
                    let bound = self
                        .parsed
                        .field_text(node, "type")
                        .map(str::to_string)
                        .or_else(|| {
                            node.child_by_field_name("right")
                                .and_then(|r| self.expr_type(r, scope))
                        });
                    if let Some(t) = bound {
                        scope.bind(self.text(left), t);
                    }
                }
            }
            "call" => {
                if let Some(site) = self.call(node, scope, in_class) {
                    sites.push(site);
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        let children: Vec<Node> = node.named_children(&mut cursor).collect();
        for child in children {
            self.collect_calls(child, scope, in_class, sites);
        }
    }

    fn call(&self, node: Node, scope: &TypeScope, in_class: bool) -> Option<CallSiteFragment> {
        let function = node.child_by_field_name("function")?;
        let (method_name, receiver_expr, receiver_type, is_constructor_call) = match function.kind() {
            "identifier" => {
                let name = self.text(function).to_string();
                if looks_like_type(&name) {
                    (name.clone(), None, Some(name), true)
                } else {
                    (name, None, None, false)
                }
            }
            "attribute" => {
                let object = function.child_by_field_name("object")?;
                let attribute = self.parsed.field_text(function, "attribute")?.to_string();
                let receiver_type = self.receiver_type(object, scope, in_class);
                (attribute, Some(self.text(object).to_string()), receiver_type, false)
            }
            _ => return None,
        };

        let mut arguments = Vec::new();
        let mut argument_types = Vec::new();
        if let Some(list) = node.child_by_field_name("arguments") {
            let mut cursor = list.walk();
            for arg in list.named_children(&mut cursor) {
                if arg.kind() == "comment" {
                    continue;
                }
                arguments.push(self.text(arg).to_string());
                let value = if arg.kind() == "keyword_argument" {
                    arg.child_by_field_name("value")
                } else {
                    Some(arg)
                };
                argument_types.push(value.and_then(|v| self.expr_type(v, scope)));
            }
        }

        Some(CallSiteFragment {
            guess: CalleeGuess {
                method_name,
                receiver_expr,
                receiver_type,
                argument_types,
                signature: None,
                is_constructor_call,
            },
            arguments,
            line: node.start_position().row + 1,
            span: Some(Span::from_node(node)),
        })
    }

    fn receiver_type(&self, object: Node, scope: &TypeScope, in_class: bool) -> Option<String> {
        let current = self.classes.last().filter(|_| in_class);
        let text = self.text(object);
        match object.kind() {
            "identifier" if matches!(text, "self" | "cls") => {
                current.map(|c| c.qualified_name.clone())
            }
            "identifier" => scope
                .lookup(text)
                .map(str::to_string)
                .or_else(|| looks_like_type(text).then(|| text.to_string())),
            // `super().save()`
            "call" if self.parsed.field_text(object, "function") == Some("super") => {
                current.and_then(|c| c.superclass.clone())
            }
            // `self.repo.save()`
            "attribute" => {
                let inner = object.child_by_field_name("object")?;
                let attr = self.parsed.field_text(object, "attribute")?;
                (self.text(inner) == "self")
                    .then(|| current.and_then(|c| c.attributes.lookup(attr)).map(str::to_string))
                    .flatten()
            }
            _ => None,
        }
    }

    /// Type of an expression, when evident locally.
    fn expr_type(&self, expr: Node, scope: &TypeScope) -> Option<String> {
        let name = match expr.kind() {
            "string" | "concatenated_string" => "str",
            "integer" => "int",
            "float" => "float",
            "true" | "false" => "bool",
            "list" | "list_comprehension" => "list",
            "dictionary" | "dictionary_comprehension" => "dict",
            "tuple" => "tuple",
            "set" | "set_comprehension" => "set",
            "identifier" => return scope.lookup(self.text(expr)).map(str::to_string),
            "call" => {
                let function = expr.child_by_field_name("function")?;
                let text = self.text(function);
                return (function.kind() == "identifier" && looks_like_type(text))
                    .then(|| text.to_string());
            }
            _ => return None,
        };
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(path: &str, source: &str, level: AnalysisLevel) -> UnitFragment {
        let analyzer = PythonAnalyzer::new();
        let parsed = analyzer.parse(Path::new(path), source.as_bytes()).unwrap();
        analyzer.extract_unit(&parsed, level).unwrap()
    }

    const SHOP: &str = r#""""Order handling."""
from sqlalchemy.orm import DeclarativeBase
import os


class Order(Base):
    """A persisted order."""
    status: str = "new"

    def __init__(self, code: str, qty=1):
        self.code = code

    def save(self, *args, **kwargs):
        pass

    @staticmethod
    def parse(text):
        return Order(text)


class OrderService:
    def process(self, order: Order):
        # persist
        order.save()
        fresh = Order("x", qty=2)
        fresh.save()
        self.audit("done")

    def audit(self, message):
        def inner():
            os.getcwd()
        inner()


def main():
    OrderService().process(Order.parse("a"))
"#;

    #[test]
    fn test_module_name() {
        assert_eq!(module_name("shop/orders.py"), "shop.orders");
        assert_eq!(module_name("./shop/__init__.py"), "shop");
    }

    #[test]
    fn test_extract_declarations() {
        let unit = extract("shop/orders.py", SHOP, AnalysisLevel::SymbolTable);
        assert_eq!(unit.package.as_deref(), Some("shop.orders"));
        assert_eq!(
            unit.imports,
            vec!["sqlalchemy.orm.DeclarativeBase".to_string(), "os".to_string()]
        );

        let order = &unit.types[0];
        assert_eq!(order.qualified_name, "shop.orders.Order");
        assert_eq!(order.supertypes, vec!["Base"]);
        assert_eq!(order.fields[0].name, "status");
        assert_eq!(order.fields[0].declared_type.as_deref(), Some("str"));

        let keys: Vec<String> = unit.callables.iter().map(|c| c.signature.key()).collect();
        assert!(keys.contains(&"shop.orders.Order.__init__(str,_)".to_string()));
        assert!(keys.contains(&"shop.orders.Order.save(_,_)".to_string()));
        assert!(keys.contains(&"shop.orders.Order.parse(_)".to_string()));
        assert!(keys.contains(&"shop.orders.OrderService.audit.inner()".to_string()));
        assert!(keys.contains(&"shop.orders.main()".to_string()));

        let init = unit.callables.iter().find(|c| c.name == "__init__").unwrap();
        assert!(init.modifiers.is_constructor);
        assert_eq!(init.owner, Some(0));
        assert!(init.parameters[1].has_default);

        let parse = unit.callables.iter().find(|c| c.name == "parse").unwrap();
        assert!(parse.modifiers.is_static);
        let inner = unit.callables.iter().find(|c| c.name == "inner").unwrap();
        assert_eq!(inner.owner, None);
    }

    #[test]
    fn test_extract_calls() {
        let unit = extract("shop/orders.py", SHOP, AnalysisLevel::CallGraph);
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
                ("Order", Some("Order")),
                ("save", Some("Order")),
                ("audit", Some("shop.orders.OrderService")),
            ]
        );
        assert!(process.call_sites[1].guess.is_constructor_call);
        assert_eq!(
            process.call_sites[1].guess.argument_types,
            vec![Some("str".to_string()), Some("int".to_string())]
        );

        // Calls inside a nested function belong to it, not the outer method.
        let audit = unit.callables.iter().find(|c| c.name == "audit").unwrap();
        assert_eq!(audit.call_sites.len(), 1);
        assert_eq!(audit.call_sites[0].guess.method_name, "inner");
    }

    #[test]
    fn test_docstrings_are_bound() {
        let unit = extract("shop/orders.py", SHOP, AnalysisLevel::SymbolTable);
        let docs: Vec<(Option<LocalOwner>, &str)> = unit
            .comments
            .iter()
            .filter(|c| c.is_doc)
            .map(|c| (c.owner, c.text.as_str()))
            .collect();
        assert_eq!(docs[0], (Some(LocalOwner::Unit), "\"\"\"Order handling.\"\"\""));
        assert_eq!(docs[1], (Some(LocalOwner::Type(0)), "\"\"\"A persisted order.\"\"\""));
        assert!(unit.comments.iter().any(|c| !c.is_doc && c.text == "# persist"));
    }
}
