//! Barrier-ordered analysis stages.
//!
//! ```text
//! inputs ──par──▶ fragments ──merge──▶ model ──▶ symbol table ──▶ call graph ──▶ facts
//!          (rayon)            (one writer)
//! ```
//!
//! Each stage consumes the complete, immutable output of the one before it.
//! Stages above the requested level are not run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::{AdapterRegistry, ArtifactAdapter, SourceSet};
use crate::callgraph::{self, CallGraph};
use crate::config::EngineConfig;
use crate::error::{AnalysisError, Result};
use crate::fingerprint::{CacheKey, SourceFingerprint};
use crate::index::SymbolTable;
use crate::inference::{self, ClassifierInput, DerivedFacts};
use crate::model::{AnalysisLevel, CanonicalModel, Language, Strategy, UnitFragment};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique generation id.
pub fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// One immutable, fully built generation.
#[derive(Debug, Clone)]
pub struct AnalysisArtifact {
    pub generation: u64,
    pub source_set_id: String,
    pub key: CacheKey,
    pub adapter: String,
    pub model: Arc<CanonicalModel>,
    /// Present from `symbol-table` upwards.
    pub symbol_table: Option<Arc<SymbolTable>>,
    /// Present from `call-graph` upwards.
    pub call_graph: Option<Arc<CallGraph>>,
    /// Present at `call-graph+inference`.
    pub facts: Option<Arc<DerivedFacts>>,
}

impl AnalysisArtifact {
    pub fn level(&self) -> AnalysisLevel {
        self.key.level
    }

    pub fn fingerprint(&self) -> &SourceFingerprint {
        &self.key.fingerprint
    }

    pub fn language(&self) -> Language {
        self.model.language
    }

    pub fn summary(&self) -> ArtifactSummary {
        ArtifactSummary {
            generation: self.generation,
            source_set: self.source_set_id.clone(),
            cache_key: self.key.to_string(),
            adapter: self.adapter.clone(),
            language: self.model.language,
            strategy: self.model.strategy,
            level: self.level(),
            units: self.model.units.len(),
            types: self.model.types.len(),
            callables: self.model.callables.len(),
            call_sites: self.model.call_sites.len(),
            comments: self.model.comments.len(),
            resolved_calls: self.call_graph.as_ref().map(|g| g.stats().resolved),
            unresolved_calls: self.call_graph.as_ref().map(|g| g.stats().unresolved),
            derived_facts: self.facts.as_ref().map(|f| f.len()),
        }
    }
}

/// Counts describing an artifact, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub generation: u64,
    pub source_set: String,
    pub cache_key: String,
    pub adapter: String,
    pub language: Language,
    pub strategy: Strategy,
    pub level: AnalysisLevel,
    pub units: usize,
    pub types: usize,
    pub callables: usize,
    pub call_sites: usize,
    pub comments: usize,
    pub resolved_calls: Option<usize>,
    pub unresolved_calls: Option<usize>,
    pub derived_facts: Option<usize>,
}

/// Runs the stages for one source set.
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: AdapterRegistry,
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(registry: AdapterRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Pipeline over the built-in adapters.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::new(AdapterRegistry::with_defaults(&config.ingestion), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// The adapter for `source_set`, checked against `level` without reading input.
    pub fn adapter_for(&self, source_set: &SourceSet, level: AnalysisLevel) -> Result<Arc<dyn ArtifactAdapter>> {
        let adapter = self.registry.adapter_for(source_set)?;
        adapter.check_level(level)?;
        Ok(adapter)
    }

    /// Build a new generation at `level`.
    pub fn build(&self, source_set: &SourceSet, level: AnalysisLevel) -> Result<AnalysisArtifact> {
        let adapter = self.adapter_for(source_set, level)?;
        let key = CacheKey::for_source_set(source_set, level);
        let started = Instant::now();

        let model = Arc::new(self.ingest(adapter.as_ref(), source_set, level)?);

        let symbol_table = if level >= AnalysisLevel::SymbolTable {
            Some(Arc::new(SymbolTable::build(&model)?))
        } else {
            None
        };

        let call_graph = match (&symbol_table, level >= AnalysisLevel::CallGraph) {
            (Some(table), true) => Some(Arc::new(callgraph::resolve(
                &model,
                table,
                &self.config.resolution,
            ))),
            _ => None,
        };

        let facts = match (&symbol_table, level >= AnalysisLevel::CallGraphInference) {
            (Some(table), true) => {
                let input = ClassifierInput {
                    model: &model,
                    table,
                    graph: call_graph.as_deref(),
                    config: &self.config.inference,
                };
                Some(Arc::new(inference::infer(&input, level)))
            }
            _ => None,
        };

        let artifact = AnalysisArtifact {
            generation: next_generation(),
            source_set_id: source_set.id.clone(),
            key,
            adapter: adapter.name().to_string(),
            model,
            symbol_table,
            call_graph,
            facts,
        };
        info!(
            source_set = %source_set.id,
            generation = artifact.generation,
            level = %level,
            fingerprint = artifact.fingerprint().short(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built analysis artifact"
        );
        Ok(artifact)
    }

    /// Ingest every input in parallel, then merge after the barrier.
    fn ingest(
        &self,
        adapter: &dyn ArtifactAdapter,
        source_set: &SourceSet,
        level: AnalysisLevel,
    ) -> Result<CanonicalModel> {
        let strategy = source_set.strategy()?;
        let results: Vec<Result<Vec<UnitFragment>>> = source_set
            .inputs
            .par_iter()
            .map(|input| adapter.ingest(input, level))
            .collect();

        // Report the first failure in input order, not completion order.
        let mut fragments = Vec::new();
        for result in results {
            fragments.extend(result?);
        }
        check_unique_paths(&fragments)?;

        debug!(
            adapter = adapter.name(),
            fragments = fragments.len(),
            "merging fragments"
        );
        Ok(CanonicalModel::assemble(strategy, source_set.language, fragments))
    }
}

fn check_unique_paths(fragments: &[UnitFragment]) -> Result<()> {
    let mut paths: Vec<&str> = fragments.iter().map(|f| f.path.as_str()).collect();
    paths.sort_unstable();
    match paths.windows(2).find(|w| w[0] == w[1]) {
        Some(w) => Err(AnalysisError::ingestion(
            w[0],
            "compilation unit appears more than once in the source set",
        )),
        None => Ok(()),
    }
}
