//! Call graph construction.
//!
//! The graph is built once per generation from the canonical model and its
//! symbol table:
//!
//! ```text
//! CanonicalModel + SymbolTable
//!            │
//!            ▼
//!     ┌──────────────┐     one edge per call site
//!     │ CallResolver │───▶ (site, source, target | UNRESOLVED, kind)
//!     └──────────────┘
//!            │
//!            ▼
//!        CallGraph  (edge list + petgraph view)
//! ```

mod graph;
mod resolver;

pub use graph::{CallEdge, CallGraph, CallTarget, EdgeKind, ResolutionStats};
pub use resolver::{resolve, CallResolver, Resolution};
