//! Syntax-tree strategy.
//!
//! Each object language gets a [`LanguageAnalyzer`] that parses a file with
//! its tree-sitter grammar and extracts declarations, call expressions and
//! comments into a [`UnitFragment`]. Nothing is resolved here: receiver
//! types are local best-effort guesses and callee signatures stay textual.
//!
//! # Adding a New Language
//!
//! 1. Create a new module next to `java.rs` (e.g., `go.rs`)
//! 2. Implement the `LanguageAnalyzer` trait
//! 3. Register the analyzer below

mod c;
mod java;
mod python;

pub use c::CAnalyzer;
pub use java::JavaAnalyzer;
pub use python::PythonAnalyzer;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use super::{ArtifactAdapter, SourceInput};
use crate::config::IngestionConfig;
use crate::error::{AnalysisError, Result};
use crate::model::{AnalysisLevel, CommentFragment, Language, Span, Strategy, UnitFragment};

/// Holds a parsed tree-sitter tree and associated metadata.
pub struct ParsedFile {
    /// The tree-sitter parse tree.
    pub tree: tree_sitter::Tree,
    /// The original source code (kept for node text extraction).
    pub source: Vec<u8>,
    /// The file path (for error reporting and module naming).
    pub path: String,
}

impl ParsedFile {
    /// Get the source code as a string slice.
    pub fn source_str(&self) -> &str {
        std::str::from_utf8(&self.source).unwrap_or("")
    }

    /// Get text for a tree-sitter node.
    pub fn node_text(&self, node: tree_sitter::Node) -> &str {
        node.utf8_text(&self.source).unwrap_or("")
    }

    /// Text of a named field of `node`, if present.
    pub fn field_text(&self, node: tree_sitter::Node, field: &str) -> Option<&str> {
        node.child_by_field_name(field).map(|n| self.node_text(n))
    }

    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Position of the first ERROR or MISSING node.
    pub fn first_error(&self) -> Option<Span> {
        fn find(node: tree_sitter::Node) -> Option<tree_sitter::Node> {
            if node.is_error() || node.is_missing() {
                return Some(node);
            }
            if !node.has_error() {
                return None;
            }
            let mut cursor = node.walk();
            let children: Vec<_> = node.children(&mut cursor).collect();
            children.into_iter().find_map(find)
        }
        find(self.tree.root_node()).map(Span::from_node)
    }

    /// A comment fragment for a comment node, bound later by span.
    pub fn comment(&self, node: tree_sitter::Node, is_doc: bool) -> CommentFragment {
        CommentFragment {
            text: self.node_text(node).to_string(),
            span: Span::from_node(node),
            is_doc,
            owner: None,
        }
    }
}

/// Language-specific analyzer trait.
///
/// # Thread Safety
///
/// tree_sitter::Parser is not Sync, so implementations create parsers as
/// needed.
pub trait LanguageAnalyzer: Send + Sync {
    fn language(&self) -> Language;

    /// Returns file extensions this analyzer handles (without dot).
    fn file_extensions(&self) -> &'static [&'static str];

    /// Highest level this analyzer's extraction supports.
    fn max_level(&self) -> AnalysisLevel;

    /// Parse a source file into a tree-sitter tree.
    ///
    /// Partial parse errors are still returned as a valid tree with ERROR nodes.
    fn parse(&self, path: &Path, source: &[u8]) -> anyhow::Result<ParsedFile>;

    /// Extract the canonical fragment of a parsed file.
    ///
    /// Call expressions are only collected when `level` includes the call graph.
    fn extract_unit(&self, parsed: &ParsedFile, level: AnalysisLevel)
        -> anyhow::Result<UnitFragment>;

    /// Check if this analyzer handles the given file extension.
    fn handles_extension(&self, ext: &str) -> bool {
        self.file_extensions().contains(&ext)
    }
}

/// Static storage for C analyzer.
static C_ANALYZER: OnceCell<CAnalyzer> = OnceCell::new();

/// Static storage for Java analyzer.
static JAVA_ANALYZER: OnceCell<JavaAnalyzer> = OnceCell::new();

/// Static storage for Python analyzer.
static PYTHON_ANALYZER: OnceCell<PythonAnalyzer> = OnceCell::new();

/// Whether analyzers have been registered.
static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Register all available language analyzers.
///
/// This is idempotent - calling it multiple times is safe.
pub fn register_analyzers() {
    if REGISTERED.swap(true, Ordering::SeqCst) {
        return;
    }

    C_ANALYZER.get_or_init(CAnalyzer::new);
    JAVA_ANALYZER.get_or_init(JavaAnalyzer::new);
    PYTHON_ANALYZER.get_or_init(PythonAnalyzer::new);
}

/// Get an analyzer for the given file extension.
pub fn get_analyzer(ext: &str) -> Option<&'static dyn LanguageAnalyzer> {
    Language::from_extension(ext).and_then(get_analyzer_for)
}

/// Get the analyzer of an object language.
pub fn get_analyzer_for(language: Language) -> Option<&'static dyn LanguageAnalyzer> {
    register_analyzers();

    match language {
        Language::C => C_ANALYZER.get().map(|a| a as &'static dyn LanguageAnalyzer),
        Language::Java => JAVA_ANALYZER.get().map(|a| a as &'static dyn LanguageAnalyzer),
        Language::Python => PYTHON_ANALYZER.get().map(|a| a as &'static dyn LanguageAnalyzer),
    }
}

/// Adapter running one [`LanguageAnalyzer`] per source file.
pub struct SyntaxTreeAdapter {
    analyzer: &'static dyn LanguageAnalyzer,
    name: String,
    tolerate_parse_errors: bool,
}

impl SyntaxTreeAdapter {
    pub fn new(analyzer: &'static dyn LanguageAnalyzer, config: &IngestionConfig) -> Self {
        Self {
            name: format!("{}-syntax", analyzer.language()),
            analyzer,
            tolerate_parse_errors: config.tolerate_parse_errors,
        }
    }

    pub fn for_language(language: Language, config: &IngestionConfig) -> Option<Self> {
        get_analyzer_for(language).map(|analyzer| Self::new(analyzer, config))
    }
}

impl ArtifactAdapter for SyntaxTreeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn language(&self) -> Language {
        self.analyzer.language()
    }

    fn strategy(&self) -> Strategy {
        Strategy::SyntaxTree
    }

    fn max_level(&self) -> AnalysisLevel {
        self.analyzer.max_level()
    }

    fn ingest(&self, input: &SourceInput, level: AnalysisLevel) -> Result<Vec<UnitFragment>> {
        self.check_level(level)?;
        let SourceInput::File { path, contents } = input else {
            return Err(AnalysisError::ingestion(
                input.path(),
                "syntax-tree adapter given a rich artifact",
            ));
        };

        let parsed = self
            .analyzer
            .parse(Path::new(path), contents.as_bytes())
            .map_err(|e| AnalysisError::ingestion(path, e))?;

        if let Some(at) = parsed.first_error() {
            if !self.tolerate_parse_errors {
                return Err(AnalysisError::ingestion(
                    path,
                    format!("syntax error at {}", at),
                ));
            }
            warn!(path = %path, at = %at, "tolerating syntax error");
        }

        let mut unit = self
            .analyzer
            .extract_unit(&parsed, level)
            .map_err(|e| AnalysisError::ingestion(path, e))?;
        unit.has_parse_errors = parsed.has_errors();

        debug!(
            adapter = %self.name,
            path = %path,
            types = unit.types.len(),
            callables = unit.callables.len(),
            call_sites = unit.call_site_count(),
            "extracted unit"
        );
        Ok(vec![unit])
    }
}

/// Flat name-to-type scope used for local receiver guesses.
#[derive(Debug, Default, Clone)]
pub(crate) struct TypeScope {
    bindings: HashMap<String, String>,
}

impl TypeScope {
    pub(crate) fn bind(&mut self, name: impl Into<String>, declared_type: impl Into<String>) {
        let declared_type = declared_type.into();
        if !declared_type.is_empty() {
            self.bindings.insert(name.into(), declared_type);
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&str> {
        self.bindings.get(name).map(String::as_str)
    }
}

/// Whether an identifier looks like a type name (`Order`, not `order`).
pub(crate) fn looks_like_type(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_analyzer() {
        assert_eq!(get_analyzer("java").map(|a| a.language()), Some(Language::Java));
        assert_eq!(get_analyzer("h").map(|a| a.language()), Some(Language::C));
        assert!(get_analyzer("rs").is_none());
    }

    #[test]
    fn test_parse_error_is_ingestion_failure() {
        let adapter =
            SyntaxTreeAdapter::for_language(Language::Java, &IngestionConfig::default()).unwrap();
        let input = SourceInput::file("Broken.java", "class Broken { void f( { }");
        let err = adapter.ingest(&input, AnalysisLevel::SymbolTable).unwrap_err();
        assert!(err.is_ingestion_failure());
        assert!(err.to_string().contains("syntax error"));

        let tolerant = SyntaxTreeAdapter::for_language(
            Language::Java,
            &IngestionConfig {
                tolerate_parse_errors: true,
            },
        )
        .unwrap();
        let units = tolerant.ingest(&input, AnalysisLevel::SymbolTable).unwrap();
        assert!(units[0].has_parse_errors);
    }

    #[test]
    fn test_c_adapter_refuses_call_graph() {
        let adapter =
            SyntaxTreeAdapter::for_language(Language::C, &IngestionConfig::default()).unwrap();
        let input = SourceInput::file("main.c", "int main(void) { return 0; }");
        let err = adapter.ingest(&input, AnalysisLevel::CallGraph).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedLevel { .. }));
    }
}
