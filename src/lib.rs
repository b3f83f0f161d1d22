//! codemodel - multi-language program model engine.
//!
//! Source artifacts in several object languages are normalized into one
//! canonical model, indexed, resolved into a call graph and enriched with
//! derived facts (CRUD operations, entry points, persistent entities).
//!
//! # Architecture
//!
//! - `adapter`: per-strategy ingestion (rich JSON dumps, tree-sitter syntax trees)
//! - `model`: canonical entities, analysis levels and per-file fragments
//! - `index`: the symbol table
//! - `callgraph`: call site resolution into a call graph
//! - `inference`: classifiers producing derived facts
//! - `pipeline`: barrier-ordered stages producing one immutable generation
//! - `controller`: fingerprint-keyed reuse and publication of generations
//! - `query`: read-only queries over a generation
//!
//! # Adding a New Language
//!
//! See `src/adapter/syntax/` for examples. Implement `LanguageAnalyzer` and
//! register it in `adapter::syntax::get_analyzer_for`.

pub mod adapter;
pub mod callgraph;
pub mod cli;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod report;

pub use adapter::{AdapterRegistry, ArtifactAdapter, SourceInput, SourceSet};
pub use callgraph::{CallEdge, CallGraph, CallTarget, EdgeKind};
pub use config::EngineConfig;
pub use controller::{AnalysisController, ArtifactState};
pub use discovery::discover_source_set;
pub use error::{AnalysisError, Result};
pub use fingerprint::{CacheKey, SourceFingerprint};
pub use index::SymbolTable;
pub use inference::{CrudOperation, DerivedFacts, Fact, FactKind};
pub use model::{AnalysisLevel, CanonicalModel, EntityId, Language, Strategy};
pub use pipeline::{AnalysisArtifact, Pipeline};
pub use query::ModelQuery;
