//! Incremental analysis controller.
//!
//! Decides, per source set, whether a published generation can answer a
//! request or a new one must be built:
//!
//! ```text
//!              request                       success
//! NoArtifact ──────────▶ Building ─────────────────────▶ Fresh
//!                          │  ▲                           │
//!                 failure  │  │ fingerprint changed or    │
//!       (previous kept)    ▼  │ higher level requested    │
//!                        Stale ◀──────────────────────────┘
//! ```
//!
//! Published generations live in an [`ArcSwapOption`] so queries never take
//! a lock. Concurrent requests for the same fingerprint join one in-flight
//! build instead of starting their own. Builds are ticketed when they start;
//! a build never replaces a generation published by a later-started one.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use arc_swap::ArcSwapOption;
use tracing::{debug, info, warn};

use crate::adapter::SourceSet;
use crate::error::{AnalysisError, Result};
use crate::fingerprint::CacheKey;
use crate::model::AnalysisLevel;
use crate::pipeline::{AnalysisArtifact, Pipeline};

/// Where a prospective request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    /// Nothing published for the source set.
    NoArtifact,
    /// The published generation answers the request as-is.
    Fresh,
    /// A generation exists but its content or level does not match.
    Stale,
    /// A build for this content is in flight.
    Building,
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArtifactState::NoArtifact => "no-artifact",
            ArtifactState::Fresh => "fresh",
            ArtifactState::Stale => "stale",
            ArtifactState::Building => "building",
        };
        write!(f, "{}", name)
    }
}

type BuildResult = Result<Arc<AnalysisArtifact>>;

/// A build other requests can wait on.
struct InFlight {
    key: CacheKey,
    ticket: u64,
    result: Mutex<Option<BuildResult>>,
    done: Condvar,
}

impl InFlight {
    fn new(key: CacheKey, ticket: u64) -> Self {
        Self {
            key,
            ticket,
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> BuildResult {
        let mut result = lock(&self.result);
        loop {
            if let Some(result) = result.as_ref() {
                return result.clone();
            }
            result = self
                .done
                .wait(result)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn complete(&self, outcome: BuildResult) {
        let mut result = lock(&self.result);
        if result.is_none() {
            *result = Some(outcome);
        }
        self.done.notify_all();
    }
}

/// A generation together with the ticket of the build that produced it.
struct Published {
    ticket: u64,
    artifact: Arc<AnalysisArtifact>,
}

/// Per source-set bookkeeping.
#[derive(Default)]
struct Slot {
    published: ArcSwapOption<Published>,
    in_flight: Mutex<Vec<Arc<InFlight>>>,
}

impl Slot {
    fn artifact(&self) -> Option<Arc<AnalysisArtifact>> {
        self.published.load_full().map(|p| p.artifact.clone())
    }

    /// Publish unless a later-started build already did. Returns whether it stored.
    fn publish(&self, ticket: u64, artifact: &Arc<AnalysisArtifact>) -> bool {
        let previous = self.published.rcu(|current| match current {
            Some(newer) if newer.ticket > ticket => Some(newer.clone()),
            _ => Some(Arc::new(Published {
                ticket,
                artifact: artifact.clone(),
            })),
        });
        previous.map_or(true, |p| p.ticket <= ticket)
    }
}

/// Completes and unregisters an in-flight build even if the builder panics.
struct BuildGuard<'a> {
    slot: &'a Slot,
    flight: Arc<InFlight>,
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.flight.complete(Err(AnalysisError::ingestion(
            self.flight.key.to_string(),
            "build aborted",
        )));
        lock(&self.slot.in_flight).retain(|f| !Arc::ptr_eq(f, &self.flight));
    }
}

enum Role {
    Build(Arc<InFlight>),
    Join(Arc<InFlight>),
}

/// Gatekeeper in front of the [`Pipeline`].
pub struct AnalysisController {
    pipeline: Pipeline,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    tickets: AtomicU64,
}

impl AnalysisController {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            slots: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(1),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn slot(&self, id: &str) -> Arc<Slot> {
        lock(&self.slots)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// State a request for `(source_set, level)` would find.
    pub fn state(&self, source_set: &SourceSet, level: AnalysisLevel) -> ArtifactState {
        let key = CacheKey::for_source_set(source_set, level);
        let Some(slot) = lock(&self.slots).get(&source_set.id).cloned() else {
            return ArtifactState::NoArtifact;
        };
        if lock(&slot.in_flight)
            .iter()
            .any(|f| f.key.fingerprint == key.fingerprint)
        {
            return ArtifactState::Building;
        }
        match slot.artifact() {
            None => ArtifactState::NoArtifact,
            Some(artifact) if artifact.key.covers(&key) => ArtifactState::Fresh,
            Some(_) => ArtifactState::Stale,
        }
    }

    /// Return a generation answering `(source_set, level)`, building one if needed.
    ///
    /// `UnsupportedLevel` is reported before any build starts. A failed
    /// build publishes nothing: the previous generation, if any, stays.
    pub fn request(&self, source_set: &SourceSet, level: AnalysisLevel) -> Result<Arc<AnalysisArtifact>> {
        self.pipeline.adapter_for(source_set, level)?;
        let key = CacheKey::for_source_set(source_set, level);
        let slot = self.slot(&source_set.id);

        loop {
            if let Some(artifact) = slot.artifact() {
                if artifact.key.covers(&key) {
                    debug!(
                        source_set = %source_set.id,
                        generation = artifact.generation,
                        "fresh: reusing published generation"
                    );
                    return Ok(artifact);
                }
            }

            let role = {
                let mut in_flight = lock(&slot.in_flight);
                match in_flight
                    .iter()
                    .find(|f| f.key.fingerprint == key.fingerprint)
                {
                    Some(flight) => Role::Join(flight.clone()),
                    None => {
                        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
                        let flight = Arc::new(InFlight::new(key.clone(), ticket));
                        in_flight.push(flight.clone());
                        Role::Build(flight)
                    }
                }
            };

            match role {
                Role::Join(flight) => {
                    info!(source_set = %source_set.id, key = %flight.key, "joining in-flight build");
                    let joined = flight.wait();
                    if flight.key.covers(&key) {
                        return joined;
                    }
                    // The build we waited on was for a lower level; check again.
                }
                Role::Build(flight) => return self.build(&slot, flight, source_set, level),
            }
        }
    }

    fn build(
        &self,
        slot: &Slot,
        flight: Arc<InFlight>,
        source_set: &SourceSet,
        level: AnalysisLevel,
    ) -> BuildResult {
        let guard = BuildGuard {
            slot,
            flight: flight.clone(),
        };
        let previous = slot.artifact();
        let key = &flight.key;
        if let Some(current) = previous.as_ref().filter(|p| p.key.covers(key)) {
            // Published by a build that finished after our first check.
            flight.complete(Ok(current.clone()));
            return Ok(current.clone());
        }
        match &previous {
            None => info!(source_set = %source_set.id, level = %level, "no artifact: building"),
            Some(old) => info!(
                source_set = %source_set.id,
                level = %level,
                previous_generation = old.generation,
                previous_level = %old.level(),
                "stale: rebuilding"
            ),
        }

        let outcome = self.pipeline.build(source_set, level).map(Arc::new);
        match &outcome {
            Ok(artifact) if slot.publish(flight.ticket, artifact) => info!(
                source_set = %source_set.id,
                generation = artifact.generation,
                "fresh: published generation"
            ),
            Ok(artifact) => debug!(
                source_set = %source_set.id,
                generation = artifact.generation,
                "superseded by a later build; not published"
            ),
            Err(err) => warn!(
                source_set = %source_set.id,
                error = %err,
                kept_generation = previous.as_ref().map(|p| p.generation),
                "build failed; nothing published"
            ),
        }
        flight.complete(outcome.clone());
        drop(guard);
        outcome
    }

    /// The published generation of a source set.
    pub fn current(&self, source_set_id: &str) -> Option<Arc<AnalysisArtifact>> {
        lock(&self.slots)
            .get(source_set_id)
            .and_then(|slot| slot.artifact())
    }

    /// Drop the published generation. Readers holding it keep their copy.
    pub fn discard(&self, source_set_id: &str) -> Option<Arc<AnalysisArtifact>> {
        let slot = lock(&self.slots).get(source_set_id).cloned()?;
        let old = slot.published.swap(None).map(|p| p.artifact.clone());
        if let Some(old) = &old {
            info!(source_set = %source_set_id, generation = old.generation, "discarded generation");
        }
        old
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::adapter::{AdapterRegistry, ArtifactAdapter, SourceInput};
    use crate::config::EngineConfig;
    use crate::model::{Language, Span, Strategy, TypeFragment, TypeKind, UnitFragment};

    /// One class per file, named after the file; `broken` contents fail and
    /// `gated` contents wait until the gate opens.
    struct FakeAdapter {
        calls: Arc<AtomicUsize>,
        gate: Arc<(Mutex<bool>, Condvar)>,
    }

    impl ArtifactAdapter for FakeAdapter {
        fn name(&self) -> &str {
            "fake-java"
        }

        fn language(&self) -> Language {
            Language::Java
        }

        fn strategy(&self) -> Strategy {
            Strategy::SyntaxTree
        }

        fn max_level(&self) -> AnalysisLevel {
            AnalysisLevel::CallGraphInference
        }

        fn ingest(&self, input: &SourceInput, level: AnalysisLevel) -> Result<Vec<UnitFragment>> {
            self.check_level(level)?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input.contents() == "gated" {
                let (open, cvar) = &*self.gate;
                let mut open = lock(open);
                while !*open {
                    open = cvar.wait(open).unwrap();
                }
            }
            if input.contents() == "broken" {
                return Err(AnalysisError::ingestion(input.path(), "broken input"));
            }
            let name = input.path().trim_end_matches(".java").to_string();
            let mut unit = UnitFragment::new(input.path(), Language::Java);
            unit.types.push(TypeFragment {
                name: name.clone(),
                qualified_name: name,
                kind: TypeKind::Class,
                supertypes: vec![],
                annotations: vec![],
                modifiers: vec![],
                fields: vec![],
                span: Span::lines(1, 1),
                enclosing: None,
            });
            Ok(vec![unit])
        }
    }

    fn controller() -> (AnalysisController, Arc<AtomicUsize>) {
        let (controller, calls, _) = gated_controller();
        (controller, calls)
    }

    fn gated_controller() -> (AnalysisController, Arc<AtomicUsize>, Arc<(Mutex<bool>, Condvar)>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FakeAdapter {
            calls: calls.clone(),
            gate: gate.clone(),
        }));
        let pipeline = Pipeline::new(registry, EngineConfig::default());
        (AnalysisController::new(pipeline), calls, gate)
    }

    fn set(contents: &str) -> SourceSet {
        SourceSet::new("app", Language::Java, vec![SourceInput::file("A.java", contents)])
    }

    #[test]
    fn test_fresh_reuse_skips_adapter() {
        let (controller, calls) = controller();
        assert_eq!(controller.state(&set("a"), AnalysisLevel::CallGraph), ArtifactState::NoArtifact);

        let first = controller.request(&set("a"), AnalysisLevel::CallGraph).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(&set("a"), AnalysisLevel::SymbolTable), ArtifactState::Fresh);

        let again = controller.request(&set("a"), AnalysisLevel::SymbolTable).unwrap();
        assert_eq!(again.generation, first.generation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_on_content_or_level() {
        let (controller, calls) = controller();
        let first = controller.request(&set("a"), AnalysisLevel::SymbolTable).unwrap();

        assert_eq!(
            controller.state(&set("a"), AnalysisLevel::CallGraphInference),
            ArtifactState::Stale
        );
        let upgraded = controller.request(&set("a"), AnalysisLevel::CallGraphInference).unwrap();
        assert!(upgraded.generation > first.generation);
        assert!(upgraded.facts.is_some());

        assert_eq!(controller.state(&set("b"), AnalysisLevel::SymbolTable), ArtifactState::Stale);
        let edited = controller.request(&set("b"), AnalysisLevel::SymbolTable).unwrap();
        assert_ne!(edited.fingerprint(), upgraded.fingerprint());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(controller.current("app").unwrap().generation, edited.generation);
    }

    #[test]
    fn test_failed_build_keeps_previous_generation() {
        let (controller, _) = controller();
        let good = controller.request(&set("a"), AnalysisLevel::SymbolTable).unwrap();

        let err = controller.request(&set("broken"), AnalysisLevel::SymbolTable).unwrap_err();
        assert!(err.is_ingestion_failure());
        assert_eq!(controller.current("app").unwrap().generation, good.generation);
        assert_eq!(controller.state(&set("broken"), AnalysisLevel::SymbolTable), ArtifactState::Stale);
    }

    #[test]
    fn test_failed_first_build_leaves_nothing() {
        let (controller, _) = controller();
        assert!(controller.request(&set("broken"), AnalysisLevel::SymbolTable).is_err());
        assert!(controller.current("app").is_none());
        assert_eq!(
            controller.state(&set("broken"), AnalysisLevel::SymbolTable),
            ArtifactState::NoArtifact
        );
    }

    #[test]
    fn test_missing_adapter_is_not_built() {
        let (controller, calls) = controller();
        let set = SourceSet::new("c", Language::C, vec![SourceInput::file("a.c", "int x;")]);
        let err = controller.request(&set, AnalysisLevel::SymbolTable).unwrap_err();
        assert!(err.is_ingestion_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_earlier_build_finishing_last_does_not_overwrite() {
        let (controller, _, gate) = gated_controller();
        // The blocked ingest must not hold a worker of the global pool.
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        let (older, newer) = std::thread::scope(|scope| {
            let older = scope.spawn(|| {
                pool.install(|| controller.request(&set("gated"), AnalysisLevel::SymbolTable))
            });
            while controller.state(&set("gated"), AnalysisLevel::SymbolTable) != ArtifactState::Building {
                std::thread::yield_now();
            }

            let newer = controller.request(&set("b"), AnalysisLevel::SymbolTable).unwrap();
            let (open, cvar) = &*gate;
            *lock(open) = true;
            cvar.notify_all();
            (older.join().unwrap().unwrap(), newer)
        });

        // The caller of the older build still gets its generation.
        assert_eq!(older.fingerprint(), &CacheKey::for_source_set(&set("gated"), AnalysisLevel::SymbolTable).fingerprint);
        assert_eq!(controller.current("app").unwrap().generation, newer.generation);
        assert_eq!(controller.state(&set("b"), AnalysisLevel::SymbolTable), ArtifactState::Fresh);
    }

    #[test]
    fn test_discard() {
        let (controller, _) = controller();
        controller.request(&set("a"), AnalysisLevel::SymbolTable).unwrap();
        assert!(controller.discard("app").is_some());
        assert!(controller.current("app").is_none());
        assert!(controller.discard("missing").is_none());
    }
}
