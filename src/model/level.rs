//! Analysis levels, object-language tags and adapter strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much semantic work an artifact carries.
///
/// Levels are totally ordered; an artifact built at a higher level holds a
/// superset of the facts available at every lower level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisLevel {
    #[serde(alias = "syntax-only")]
    SyntaxOnly,
    #[serde(alias = "symbol-table")]
    SymbolTable,
    #[serde(alias = "call-graph")]
    CallGraph,
    #[serde(alias = "call-graph+inference", alias = "inference")]
    CallGraphInference,
}

impl AnalysisLevel {
    /// All levels, lowest first.
    pub const ALL: [AnalysisLevel; 4] = [
        AnalysisLevel::SyntaxOnly,
        AnalysisLevel::SymbolTable,
        AnalysisLevel::CallGraph,
        AnalysisLevel::CallGraphInference,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisLevel::SyntaxOnly => "syntax-only",
            AnalysisLevel::SymbolTable => "symbol-table",
            AnalysisLevel::CallGraph => "call-graph",
            AnalysisLevel::CallGraphInference => "call-graph+inference",
        }
    }

    /// Whether an artifact at `self` can answer a request for `requested`.
    pub fn satisfies(&self, requested: AnalysisLevel) -> bool {
        *self >= requested
    }
}

impl fmt::Display for AnalysisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "syntax-only" | "syntax" => Ok(AnalysisLevel::SyntaxOnly),
            "symbol-table" | "symbols" => Ok(AnalysisLevel::SymbolTable),
            "call-graph" => Ok(AnalysisLevel::CallGraph),
            "call-graph+inference" | "call-graph-inference" | "inference" => {
                Ok(AnalysisLevel::CallGraphInference)
            }
            other => Err(format!("unknown analysis level '{}'", other)),
        }
    }
}

/// An object language: a language being analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    C,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Java => "java",
            Language::Python => "python",
            Language::C => "c",
        }
    }

    /// File extensions (without dot) that belong to this language.
    pub fn file_extensions(&self) -> &'static [&'static str] {
        match self {
            Language::Java => &["java"],
            Language::Python => &["py"],
            Language::C => &["c", "h"],
        }
    }

    /// Look up a language by file extension.
    pub fn from_extension(ext: &str) -> Option<Language> {
        let ext = ext.trim_start_matches('.');
        [Language::Java, Language::Python, Language::C]
            .into_iter()
            .find(|lang| lang.file_extensions().contains(&ext))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "java" => Ok(Language::Java),
            "python" | "py" => Ok(Language::Python),
            "c" => Ok(Language::C),
            other => Err(format!("unsupported object language '{}'", other)),
        }
    }
}

/// Which kind of external artifact an adapter consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// A structured dump with resolved types, callables and call sites.
    RichArtifact,
    /// Concrete syntax trees queried structurally.
    SyntaxTree,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RichArtifact => "rich-artifact",
            Strategy::SyntaxTree => "syntax-tree",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
