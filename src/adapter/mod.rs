//! Artifact adapters: external artifacts in, canonical fragments out.
//!
//! Every adapter implements [`ArtifactAdapter`] and advertises the highest
//! [`AnalysisLevel`] it can produce. Asking for more is an
//! [`AnalysisError::UnsupportedLevel`] raised before any input is read.
//!
//! Two strategies exist:
//!
//! - [`rich::RichArtifactAdapter`] deserializes a structured dump whose
//!   producer already resolved types, callables and call sites.
//! - [`syntax::SyntaxTreeAdapter`] walks tree-sitter trees per file and
//!   leaves callee signatures as textual guesses.

pub mod rich;
#[cfg(feature = "tree-sitter")]
pub mod syntax;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::IngestionConfig;
use crate::error::{AnalysisError, Result};
use crate::model::{AnalysisLevel, Language, Strategy, UnitFragment};

/// One input of a source set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// A source file, analyzed syntactically.
    File { path: String, contents: String },
    /// A structured dump produced by an external analyzer.
    RichArtifact { path: String, contents: String },
}

impl SourceInput {
    pub fn file(path: impl Into<String>, contents: impl Into<String>) -> Self {
        SourceInput::File {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn rich_artifact(path: impl Into<String>, contents: impl Into<String>) -> Self {
        SourceInput::RichArtifact {
            path: path.into(),
            contents: contents.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            SourceInput::File { path, .. } | SourceInput::RichArtifact { path, .. } => path,
        }
    }

    pub fn contents(&self) -> &str {
        match self {
            SourceInput::File { contents, .. } | SourceInput::RichArtifact { contents, .. } => {
                contents
            }
        }
    }

    /// The strategy able to consume this input.
    pub fn strategy(&self) -> Strategy {
        match self {
            SourceInput::File { .. } => Strategy::SyntaxTree,
            SourceInput::RichArtifact { .. } => Strategy::RichArtifact,
        }
    }
}

/// A named collection of inputs for one object language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    /// Stable identity used by the controller to track generations.
    pub id: String,
    pub language: Language,
    pub inputs: Vec<SourceInput>,
}

impl SourceSet {
    pub fn new(id: impl Into<String>, language: Language, inputs: Vec<SourceInput>) -> Self {
        Self {
            id: id.into(),
            language,
            inputs,
        }
    }

    /// The single strategy all inputs agree on.
    pub fn strategy(&self) -> Result<Strategy> {
        let mut strategies = self.inputs.iter().map(SourceInput::strategy);
        let first = strategies.next().unwrap_or(Strategy::SyntaxTree);
        if strategies.any(|s| s != first) {
            return Err(AnalysisError::ingestion(
                &self.id,
                "source set mixes rich artifacts and source files",
            ));
        }
        Ok(first)
    }
}

/// Contract shared by all adapters.
///
/// Implementations are pure functions of their input bytes: they never
/// touch shared state, so the pipeline may call them from many workers.
pub trait ArtifactAdapter: Send + Sync {
    /// Adapter name used in errors and logs (e.g. `java-syntax`).
    fn name(&self) -> &str;

    fn language(&self) -> Language;

    fn strategy(&self) -> Strategy;

    /// Highest analysis level this adapter can produce.
    fn max_level(&self) -> AnalysisLevel;

    /// Translate one input into canonical fragments.
    fn ingest(&self, input: &SourceInput, level: AnalysisLevel) -> Result<Vec<UnitFragment>>;

    /// Fail with `UnsupportedLevel` when `level` exceeds the capability.
    fn check_level(&self, level: AnalysisLevel) -> Result<()> {
        if level > self.max_level() {
            return Err(AnalysisError::UnsupportedLevel {
                adapter: self.name().to_string(),
                requested: level,
                supported: self.max_level(),
            });
        }
        Ok(())
    }
}

/// Adapters keyed by (language, strategy).
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<(Language, StrategyKey), Arc<dyn ArtifactAdapter>>,
}

// `Strategy` has no natural order; key it by its name.
type StrategyKey = &'static str;

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapters for every supported language.
    pub fn with_defaults(config: &IngestionConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(rich::RichArtifactAdapter::new(Language::Java)));
        #[cfg(feature = "tree-sitter")]
        for language in [Language::Java, Language::Python, Language::C] {
            if let Some(adapter) = syntax::SyntaxTreeAdapter::for_language(language, config) {
                registry.register(Arc::new(adapter));
            }
        }
        #[cfg(not(feature = "tree-sitter"))]
        let _ = config;
        registry
    }

    /// Add an adapter, replacing any previous one for the same slot.
    pub fn register(&mut self, adapter: Arc<dyn ArtifactAdapter>) {
        let key = (adapter.language(), adapter.strategy().as_str());
        self.adapters.insert(key, adapter);
    }

    pub fn get(&self, language: Language, strategy: Strategy) -> Option<Arc<dyn ArtifactAdapter>> {
        self.adapters.get(&(language, strategy.as_str())).cloned()
    }

    /// The adapter that should ingest `source_set`.
    pub fn adapter_for(&self, source_set: &SourceSet) -> Result<Arc<dyn ArtifactAdapter>> {
        let strategy = source_set.strategy()?;
        self.get(source_set.language, strategy).ok_or_else(|| {
            AnalysisError::ingestion(
                &source_set.id,
                format!(
                    "no {} adapter registered for object language '{}'",
                    strategy, source_set.language
                ),
            )
        })
    }

    /// Names of registered adapters, in key order.
    pub fn names(&self) -> Vec<String> {
        self.adapters.values().map(|a| a.name().to_string()).collect()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_source_set_is_rejected() {
        let set = SourceSet::new(
            "mixed",
            Language::Java,
            vec![
                SourceInput::file("A.java", "class A {}"),
                SourceInput::rich_artifact("dump.json", "{}"),
            ],
        );
        assert!(set.strategy().unwrap_err().is_ingestion_failure());
    }

    #[cfg(feature = "tree-sitter")]
    #[test]
    fn test_default_registry_lookup() {
        let registry = AdapterRegistry::with_defaults(&IngestionConfig::default());
        let rich = registry.get(Language::Java, Strategy::RichArtifact).unwrap();
        assert_eq!(rich.max_level(), AnalysisLevel::CallGraphInference);

        let set = SourceSet::new("c", Language::C, vec![SourceInput::file("a.c", "int x;")]);
        let adapter = registry.adapter_for(&set).unwrap();
        assert_eq!(adapter.strategy(), Strategy::SyntaxTree);
        let err = adapter.check_level(AnalysisLevel::CallGraph).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedLevel { .. }));
    }
}
