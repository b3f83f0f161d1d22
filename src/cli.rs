//! Command-line interface for codemodel.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::debug;

use crate::adapter::{SourceInput, SourceSet};
use crate::config::EngineConfig;
use crate::controller::AnalysisController;
use crate::discovery::discover_source_set;
use crate::error::AnalysisError;
use crate::inference::CrudOperation;
use crate::model::{AnalysisLevel, EntityId, Language};
use crate::pipeline::{AnalysisArtifact, Pipeline};
use crate::query::ModelQuery;
use crate::report::{self, QueryReport, QueryRow};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Default configuration file names to search for.
const DEFAULT_CONFIG_NAMES: &[&str] = &["codemodel.yaml", ".codemodel.yaml"];

/// Query names accepted by `codemodel query`.
pub const QUERIES: &[&str] = &[
    "lookup",
    "callers",
    "callees",
    "reachable",
    "hierarchy",
    "methods",
    "nested",
    "fields",
    "comments",
    "docstrings",
    "annotated",
    "tests",
    "calling-lines",
    "crud",
    "entry-points",
    "unresolved",
    "class-graph",
];

/// Multi-language program model engine.
///
/// Ingests Java, Python or C sources (or a rich JSON dump), builds a
/// canonical model with a symbol table, a resolved call graph and derived
/// facts, and answers queries over it.
#[derive(Parser)]
#[command(name = "codemodel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log debug output from the engine
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build a model and print its summary
    Analyze(AnalyzeArgs),
    /// Build a model and run one query against it
    Query(QueryArgs),
}

/// Where the sources come from and how far to analyze them.
#[derive(Args)]
pub struct SourceArgs {
    /// Source file or directory
    pub path: PathBuf,

    /// Object language: java, python or c
    #[arg(short, long)]
    pub language: String,

    /// Rich JSON dump to ingest instead of parsing sources
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Analysis level: syntax-only, symbol-table, call-graph or call-graph+inference
    #[arg(long)]
    pub level: Option<String>,

    /// Path to engine configuration YAML (default: auto-discover)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    pub format: String,
}

#[derive(Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

#[derive(Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Query to run (lookup, callers, callees, reachable, hierarchy, methods,
    /// fields, comments, docstrings, crud, entry-points, unresolved, class-graph)
    pub query: String,

    /// Query argument: a qualified name, a signature, a file path or a CRUD operation
    pub argument: Option<String>,
}

/// Parsed and validated source arguments.
struct Request {
    config: EngineConfig,
    source_set: SourceSet,
    level: AnalysisLevel,
    json: bool,
}

/// Discover a configuration file in the current directory.
fn discover_config() -> Option<PathBuf> {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

/// Validate arguments and load the source set. `Err` carries an exit code.
fn prepare(args: &SourceArgs, default_level: AnalysisLevel) -> Result<Request, i32> {
    if args.format != "pretty" && args.format != "json" {
        eprintln!(
            "Error: invalid format {:?}, must be 'pretty' or 'json'",
            args.format
        );
        return Err(EXIT_ERROR);
    }

    let language: Language = args.language.parse().map_err(|e| {
        eprintln!("Error: {}", e);
        EXIT_ERROR
    })?;

    let level = match &args.level {
        Some(level) => level.parse().map_err(|e| {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        })?,
        None => default_level,
    };

    let config = match args.config.clone().or_else(discover_config) {
        Some(path) => EngineConfig::parse_file(&path).map_err(|e| {
            eprintln!("Error loading {}: {}", path.display(), e);
            EXIT_ERROR
        })?,
        None => EngineConfig::default(),
    };

    let source_set = load_source_set(&args.path, args.artifact.as_deref(), language, &config)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            EXIT_ERROR
        })?;
    if source_set.inputs.is_empty() {
        eprintln!("Warning: no {} sources found under {}", language, args.path.display());
    }

    Ok(Request {
        config,
        source_set,
        level,
        json: args.format == "json",
    })
}

fn load_source_set(
    path: &Path,
    artifact: Option<&Path>,
    language: Language,
    config: &EngineConfig,
) -> Result<SourceSet, AnalysisError> {
    match artifact {
        Some(dump) => {
            let contents = std::fs::read_to_string(dump).map_err(|e| AnalysisError::Io {
                path: dump.display().to_string(),
                reason: e.to_string(),
            })?;
            Ok(SourceSet::new(
                path.display().to_string(),
                language,
                vec![SourceInput::rich_artifact(dump.display().to_string(), contents)],
            ))
        }
        None => discover_source_set(path, language, &config.discovery),
    }
}

/// Usage problems exit with 2, analysis failures with 1.
fn failure_code(err: &AnalysisError) -> i32 {
    match err {
        AnalysisError::UnsupportedLevel { .. } | AnalysisError::Config { .. } => EXIT_ERROR,
        _ => EXIT_FAILED,
    }
}

fn build(request: &Request) -> Result<Arc<AnalysisArtifact>, i32> {
    let controller = AnalysisController::new(Pipeline::with_config(request.config.clone()));
    controller
        .request(&request.source_set, request.level)
        .map_err(|e| {
            eprintln!("Error: {}", e);
            failure_code(&e)
        })
}

/// Run the analyze command.
pub fn run_analyze(args: &AnalyzeArgs) -> anyhow::Result<i32> {
    let request = match prepare(&args.source, AnalysisLevel::CallGraphInference) {
        Ok(r) => r,
        Err(code) => return Ok(code),
    };
    let artifact = match build(&request) {
        Ok(a) => a,
        Err(code) => return Ok(code),
    };

    let path = args.source.path.to_string_lossy().to_string();
    let summary = artifact.summary();
    let skipped = artifact
        .facts
        .as_ref()
        .map(|f| f.skipped().to_vec())
        .unwrap_or_default();
    if request.json {
        report::write_analysis_json(&path, &summary, &skipped)?;
    } else {
        report::write_analysis_pretty(&path, &summary, &skipped);
    }
    Ok(EXIT_SUCCESS)
}

/// Run the query command.
pub fn run_query(args: &QueryArgs) -> anyhow::Result<i32> {
    if !QUERIES.contains(&args.query.as_str()) {
        eprintln!(
            "Error: unknown query {:?}, must be one of: {}",
            args.query,
            QUERIES.join(", ")
        );
        return Ok(EXIT_ERROR);
    }
    let request = match prepare(&args.source, AnalysisLevel::CallGraphInference) {
        Ok(r) => r,
        Err(code) => return Ok(code),
    };
    let artifact = match build(&request) {
        Ok(a) => a,
        Err(code) => return Ok(code),
    };

    let generation = artifact.generation;
    let query = ModelQuery::new(artifact);
    debug!(query = %args.query, argument = ?args.argument, generation, "running query");
    let rows = match answer(&query, &args.query, args.argument.as_deref()) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(failure_code(&e));
        }
    };

    let report = QueryReport {
        query: args.query.clone(),
        argument: args.argument.clone(),
        generation,
        rows,
    };
    if request.json {
        report::write_query_json(&report)?;
    } else {
        report::write_query_pretty(&report);
    }
    Ok(EXIT_SUCCESS)
}

fn required<'a>(query: &str, argument: Option<&'a str>) -> Result<&'a str, AnalysisError> {
    argument.ok_or_else(|| AnalysisError::Config {
        reason: format!("query '{}' needs an argument", query),
    })
}

/// Answer one named query as report rows.
pub fn answer(
    query: &ModelQuery,
    name: &str,
    argument: Option<&str>,
) -> Result<Vec<QueryRow>, AnalysisError> {
    let model = query.model();
    let located = |id: EntityId, line: usize| {
        let row = QueryRow::new(model.display_name(id));
        match model.path_of(id) {
            Some(path) => row.at(format!("{}:{}", path, line)),
            None => row,
        }
    };
    let callable_rows = |callables: Vec<&crate::model::Callable>| {
        callables
            .into_iter()
            .map(|c| located(EntityId::Callable(c.id), c.start_line))
            .collect::<Vec<_>>()
    };

    let rows = match name {
        "lookup" => {
            let id = query.lookup(required(name, argument)?)?;
            let line = match id {
                EntityId::Type(t) => model.type_decl(t).map(|t| t.span.start_line),
                EntityId::Callable(c) => model.callable(c).map(|c| c.start_line),
                _ => None,
            };
            vec![located(id, line.unwrap_or(0)).with_detail(id.to_string())]
        }
        "callers" => callable_rows(query.callers_of(required(name, argument)?)?),
        "callees" => callable_rows(query.callees_of(required(name, argument)?)?),
        "reachable" => callable_rows(query.reachable_from(required(name, argument)?)?),
        "methods" => callable_rows(query.methods_of(required(name, argument)?)?),
        "hierarchy" => {
            let h = query.type_hierarchy(required(name, argument)?)?;
            let mut rows: Vec<QueryRow> = h
                .supertypes
                .iter()
                .map(|s| QueryRow::new(s.clone()).with_detail("supertype"))
                .collect();
            rows.extend(
                h.external_supertypes
                    .iter()
                    .map(|s| QueryRow::new(s.clone()).with_detail("external supertype")),
            );
            rows.extend(
                h.subtypes
                    .iter()
                    .map(|s| QueryRow::new(s.clone()).with_detail("subtype")),
            );
            rows
        }
        "nested" => query
            .nested_types_of(required(name, argument)?)?
            .into_iter()
            .map(|t| located(EntityId::Type(t.id), t.span.start_line).with_detail(t.kind.to_string()))
            .collect(),
        "annotated" => {
            let wanted: Vec<&str> = required(name, argument)?
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .collect();
            query
                .methods_with_annotations(&wanted)
                .into_iter()
                .flat_map(|(annotation, callables)| {
                    callables.into_iter().map(move |c| (annotation.clone(), c))
                })
                .map(|(annotation, c)| {
                    located(EntityId::Callable(c.id), c.start_line).with_detail(format!("@{}", annotation))
                })
                .collect()
        }
        "tests" => callable_rows(query.test_methods()),
        "calling-lines" => {
            let (caller, target) = required(name, argument)?
                .rsplit_once("::")
                .ok_or_else(|| AnalysisError::Config {
                    reason: "query calling-lines takes <caller-signature>::<target>".to_string(),
                })?;
            let path = model.path_of(EntityId::Callable(query.callable_by_signature(caller)?.id));
            query
                .calling_lines(caller, target)?
                .into_iter()
                .map(|line| {
                    QueryRow::new(target.to_string()).at(format!("{}:{}", path.unwrap_or(""), line))
                })
                .collect()
        }
        "fields" => query
            .fields_of(required(name, argument)?)?
            .iter()
            .map(|f| {
                let row = QueryRow::new(f.name.clone());
                match &f.declared_type {
                    Some(t) => row.with_detail(t.clone()),
                    None => row,
                }
            })
            .collect(),
        "comments" => {
            let target = required(name, argument)?;
            let comments = match query.lookup(target) {
                Ok(id) => query.comments_for(id)?,
                Err(_) => query.comments_in_file(target)?,
            };
            comments
                .into_iter()
                .map(|c| {
                    QueryRow::new(c.text.clone())
                        .with_detail(model.display_name(c.owner))
                        .at(format!("{}:{}", model.path_of(EntityId::Comment(c.id)).unwrap_or(""), c.span.start_line))
                })
                .collect()
        }
        "docstrings" => query
            .docstrings()
            .into_iter()
            .map(|(owner, c)| located(owner, c.span.start_line).with_detail(c.text.clone()))
            .collect(),
        "crud" => {
            let filter = argument
                .map(|a| a.parse::<CrudOperation>())
                .transpose()
                .map_err(|reason| AnalysisError::Config { reason })?;
            query
                .crud_operations(filter)?
                .into_iter()
                .map(|call| {
                    let entity = call
                        .entity
                        .map(|t| model.display_name(EntityId::Type(t)))
                        .unwrap_or_else(|| "-".to_string());
                    located(EntityId::Callable(call.caller), call.line)
                        .with_detail(format!("{} {}", call.operation.as_str(), entity))
                })
                .collect()
        }
        "entry-points" => {
            let mut rows: Vec<QueryRow> = query
                .entry_point_types()?
                .into_iter()
                .map(|(t, reason)| located(EntityId::Type(t.id), t.span.start_line).with_detail(reason))
                .collect();
            rows.extend(
                query
                    .entry_point_callables()?
                    .into_iter()
                    .map(|(c, reason)| located(EntityId::Callable(c.id), c.start_line).with_detail(reason)),
            );
            rows
        }
        "unresolved" => query
            .unresolved_call_sites()?
            .into_iter()
            .map(|site| {
                let callee = match &site.guess.receiver_expr {
                    Some(receiver) => format!("{}.{}", receiver, site.guess.method_name),
                    None => site.guess.method_name.clone(),
                };
                located(EntityId::Callable(site.caller), site.line).with_detail(callee)
            })
            .collect(),
        "class-graph" => query
            .class_call_graph()?
            .into_iter()
            .map(|edge| {
                QueryRow::new(format!(
                    "{} -> {}",
                    model.display_name(EntityId::Type(edge.source)),
                    model.display_name(EntityId::Type(edge.target))
                ))
                .with_detail(format!("{} call(s)", edge.calls))
            })
            .collect(),
        other => {
            return Err(AnalysisError::Config {
                reason: format!("unknown query '{}'", other),
            })
        }
    };
    Ok(rows)
}

#[cfg(all(test, feature = "tree-sitter"))]
mod tests {
    use super::*;

    const APP: &str = r#"
class Repo:
    def save(self, item):
        pass

def main():
    repo = Repo()
    repo.save(1)
"#;

    fn query() -> ModelQuery {
        let set = SourceSet::new("app", Language::Python, vec![SourceInput::file("app.py", APP)]);
        let artifact = Pipeline::with_config(EngineConfig::default())
            .build(&set, AnalysisLevel::CallGraphInference)
            .unwrap();
        ModelQuery::new(Arc::new(artifact))
    }

    #[test]
    fn test_answer_callers_and_entry_points() {
        let q = query();
        let rows = answer(&q, "callees", Some("app.main()")).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
        assert!(names.contains(&"app.Repo.save(_)"));

        let rows = answer(&q, "entry-points", None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].detail.as_deref(), Some("main function"));
        assert_eq!(rows[0].location.as_deref(), Some("app.py:6"));
    }

    #[test]
    fn test_answer_argument_errors() {
        let q = query();
        let err = answer(&q, "callers", None).unwrap_err();
        assert_eq!(failure_code(&err), EXIT_ERROR);
        let err = answer(&q, "callers", Some("app.nothing()")).unwrap_err();
        assert_eq!(failure_code(&err), EXIT_FAILED);
        assert!(answer(&q, "crud", Some("merge")).is_err());
    }

    #[test]
    fn test_answer_calling_lines() {
        let q = query();
        let rows = answer(&q, "calling-lines", Some("app.main()::save")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location.as_deref(), Some("app.py:8"));

        let err = answer(&q, "calling-lines", Some("app.main()")).unwrap_err();
        assert_eq!(failure_code(&err), EXIT_ERROR);
        assert!(answer(&q, "tests", None).unwrap().is_empty());
    }
}
