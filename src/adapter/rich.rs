//! Rich-artifact strategy.
//!
//! Consumes a JSON dump produced by an external static analyzer that has
//! already resolved types, callables and call sites:
//!
//! ```json
//! {
//!   "schema_version": "1.1",
//!   "analysis_level": "call_graph",
//!   "compilation_units": [
//!     { "path": "src/Order.java", "package_name": "com.acme",
//!       "types": [ { "qualified_name": "com.acme.Order", "callables": [ ... ] } ],
//!       "comments": [ { "text": "...", "start_byte": 0, "end_byte": 12 } ] }
//!   ]
//! }
//! ```
//!
//! The dump is rejected, never silently degraded, when its schema version is
//! unknown or its recorded level is below what the request needs.

use serde::Deserialize;
use tracing::debug;

use super::{ArtifactAdapter, SourceInput};
use crate::error::{AnalysisError, Result};
use crate::model::signature::{self, parse_signature};
use crate::model::{
    AnalysisLevel, CallSiteFragment, CallableFragment, CalleeGuess, CommentFragment, Field,
    Language, LocalOwner, Modifiers, Parameter, Signature, Span, Strategy, TypeFragment, TypeKind,
    UnitFragment,
};

/// Schema versions this adapter understands.
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["1.0", "1.1"];

#[derive(Debug, Deserialize)]
struct RichDump {
    schema_version: String,
    analysis_level: AnalysisLevel,
    #[serde(default)]
    compilation_units: Vec<RichUnit>,
}

#[derive(Debug, Deserialize)]
struct RichUnit {
    path: String,
    #[serde(default, alias = "package")]
    package_name: Option<String>,
    #[serde(default)]
    imports: Vec<String>,
    #[serde(default)]
    types: Vec<RichType>,
    #[serde(default)]
    callables: Vec<RichCallable>,
    #[serde(default)]
    comments: Vec<RichComment>,
}

#[derive(Debug, Default, Deserialize)]
struct RichSpan {
    #[serde(default)]
    start_line: i64,
    #[serde(default)]
    end_line: i64,
    #[serde(default)]
    start_column: i64,
    #[serde(default)]
    end_column: i64,
    #[serde(default)]
    start_byte: i64,
    #[serde(default)]
    end_byte: i64,
}

impl RichSpan {
    fn to_span(&self) -> Span {
        // Producers use -1 for "unknown".
        let clamp = |v: i64| v.max(0) as usize;
        let start_line = clamp(self.start_line);
        Span {
            start_byte: clamp(self.start_byte),
            end_byte: clamp(self.end_byte),
            start_line,
            start_col: clamp(self.start_column),
            end_line: clamp(self.end_line).max(start_line),
            end_col: clamp(self.end_column),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RichType {
    #[serde(default)]
    qualified_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    kind: Option<TypeKind>,
    #[serde(default)]
    supertypes: Vec<String>,
    #[serde(default)]
    annotations: Vec<String>,
    #[serde(default)]
    modifiers: Vec<String>,
    #[serde(default)]
    fields: Vec<RichField>,
    #[serde(default)]
    enclosing: Option<String>,
    #[serde(default)]
    callables: Vec<RichCallable>,
    #[serde(default)]
    comments: Vec<RichComment>,
    #[serde(flatten)]
    span: RichSpan,
}

#[derive(Debug, Deserialize)]
struct RichField {
    name: String,
    #[serde(default, rename = "type")]
    declared_type: Option<String>,
    #[serde(default)]
    modifiers: Vec<String>,
    #[serde(default)]
    annotations: Vec<String>,
    #[serde(default, alias = "start_line")]
    line: i64,
}

#[derive(Debug, Deserialize)]
struct RichCallable {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    return_type: Option<String>,
    #[serde(default)]
    parameters: Vec<RichParameter>,
    #[serde(default)]
    modifiers: Vec<String>,
    #[serde(default)]
    annotations: Vec<String>,
    #[serde(default)]
    is_constructor: bool,
    #[serde(default)]
    call_sites: Vec<RichCallSite>,
    #[serde(default)]
    comments: Vec<RichComment>,
    #[serde(flatten)]
    span: RichSpan,
}

#[derive(Debug, Deserialize)]
struct RichParameter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    declared_type: Option<String>,
    #[serde(default, alias = "start_line")]
    source_line: i64,
    #[serde(default)]
    has_default: bool,
    #[serde(default, alias = "is_var_args")]
    is_variadic: bool,
}

#[derive(Debug, Deserialize)]
struct RichCallSite {
    #[serde(default, alias = "callee_signature")]
    callee_signature_guess: String,
    #[serde(default, alias = "argument_expr")]
    argument_expressions: Vec<String>,
    #[serde(default, alias = "start_line")]
    line: i64,
    #[serde(default)]
    method_name: Option<String>,
    #[serde(default)]
    receiver_expr: Option<String>,
    #[serde(default)]
    receiver_type: Option<String>,
    #[serde(default)]
    argument_types: Vec<String>,
    #[serde(default)]
    is_constructor_call: bool,
}

#[derive(Debug, Deserialize)]
struct RichComment {
    #[serde(default, alias = "content")]
    text: Option<String>,
    #[serde(default, alias = "is_javadoc")]
    is_doc: bool,
    #[serde(flatten)]
    span: RichSpan,
}

/// Adapter for structured dumps of one object language.
pub struct RichArtifactAdapter {
    language: Language,
    name: String,
}

impl RichArtifactAdapter {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            name: format!("{}-rich", language),
        }
    }
}

impl ArtifactAdapter for RichArtifactAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn language(&self) -> Language {
        self.language
    }

    fn strategy(&self) -> Strategy {
        Strategy::RichArtifact
    }

    fn max_level(&self) -> AnalysisLevel {
        AnalysisLevel::CallGraphInference
    }

    fn ingest(&self, input: &SourceInput, level: AnalysisLevel) -> Result<Vec<UnitFragment>> {
        self.check_level(level)?;
        let origin = input.path();
        let SourceInput::RichArtifact { contents, .. } = input else {
            return Err(AnalysisError::ingestion(
                origin,
                "rich-artifact adapter given a plain source file",
            ));
        };

        let dump: RichDump = serde_json::from_str(contents)
            .map_err(|e| AnalysisError::ingestion(origin, format!("malformed dump: {}", e)))?;

        if !SUPPORTED_SCHEMA_VERSIONS.contains(&dump.schema_version.as_str()) {
            return Err(AnalysisError::ingestion(
                origin,
                format!("unrecognized schema_version '{}'", dump.schema_version),
            ));
        }

        // Inference is computed locally; the dump only has to carry the call graph.
        let needed = level.min(AnalysisLevel::CallGraph);
        if dump.analysis_level < needed {
            return Err(AnalysisError::ingestion(
                origin,
                format!(
                    "dump was produced at {} but {} is required",
                    dump.analysis_level, needed
                ),
            ));
        }

        let fragments = dump
            .compilation_units
            .into_iter()
            .map(|unit| convert_unit(self.language, origin, unit, level))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            adapter = %self.name,
            origin,
            units = fragments.len(),
            "ingested rich artifact"
        );
        Ok(fragments)
    }
}

fn convert_unit(
    language: Language,
    origin: &str,
    unit: RichUnit,
    level: AnalysisLevel,
) -> Result<UnitFragment> {
    if unit.path.trim().is_empty() {
        return Err(AnalysisError::ingestion(origin, "compilation unit without a path"));
    }
    let location = format!("{} ({})", origin, unit.path);

    let mut fragment = UnitFragment::new(unit.path, language);
    fragment.package = unit.package_name.filter(|p| !p.is_empty());
    fragment.imports = unit.imports;

    // Type qualified names first, so `enclosing` can be resolved locally.
    let type_names: Vec<String> = unit.types.iter().map(|t| t.qualified_name.clone()).collect();
    if let Some(pos) = type_names.iter().position(|n| n.trim().is_empty()) {
        return Err(AnalysisError::ingestion(
            &location,
            format!("type #{} has no qualified_name", pos),
        ));
    }

    for (index, t) in unit.types.into_iter().enumerate() {
        let enclosing = match &t.enclosing {
            Some(outer) => type_names.iter().position(|n| n == outer),
            None => innermost_enclosing(&type_names, index),
        };
        let simple = t
            .name
            .clone()
            .unwrap_or_else(|| signature::simple_name(&t.qualified_name).to_string());

        for callable in t.callables {
            let (c, comments) = convert_callable(
                &location,
                callable,
                Some((index, t.qualified_name.as_str(), simple.as_str())),
                fragment.package.as_deref(),
                level,
            )?;
            let local = fragment.callables.len();
            fragment.callables.push(c);
            push_comments(&mut fragment, comments, Some(LocalOwner::Callable(local)));
        }
        push_comments(&mut fragment, t.comments, Some(LocalOwner::Type(index)));

        fragment.types.push(TypeFragment {
            name: simple,
            qualified_name: t.qualified_name,
            kind: t.kind.unwrap_or(TypeKind::Class),
            supertypes: t.supertypes,
            annotations: strip_at(t.annotations),
            modifiers: t.modifiers,
            fields: t
                .fields
                .into_iter()
                .map(|f| Field {
                    name: f.name,
                    declared_type: f.declared_type.filter(|s| !s.is_empty()),
                    modifiers: f.modifiers,
                    annotations: strip_at(f.annotations),
                    line: f.line.max(0) as usize,
                })
                .collect(),
            span: t.span.to_span(),
            enclosing,
        });
    }

    for callable in unit.callables {
        let (c, comments) =
            convert_callable(&location, callable, None, fragment.package.as_deref(), level)?;
        let local = fragment.callables.len();
        fragment.callables.push(c);
        push_comments(&mut fragment, comments, Some(LocalOwner::Callable(local)));
    }

    push_comments(&mut fragment, unit.comments, None);
    Ok(fragment)
}

/// The nearest earlier type whose qualified name prefixes this one.
fn innermost_enclosing(names: &[String], index: usize) -> Option<usize> {
    let name = &names[index];
    names
        .iter()
        .enumerate()
        .filter(|(i, outer)| *i != index && name.starts_with(&format!("{}.", outer)))
        .max_by_key(|(_, outer)| outer.len())
        .map(|(i, _)| i)
}

fn convert_callable(
    origin: &str,
    callable: RichCallable,
    owner: Option<(usize, &str, &str)>,
    package: Option<&str>,
    level: AnalysisLevel,
) -> Result<(CallableFragment, Vec<RichComment>)> {
    let text = callable.signature.trim();
    if text.is_empty() {
        return Err(AnalysisError::ingestion(origin, "callable without a signature"));
    }

    let (raw_name, parsed_params) = match parse_signature(text) {
        Some((name, params)) => (name, Some(params)),
        None => (text.to_string(), None),
    };
    let parameter_types = parsed_params.unwrap_or_else(|| {
        callable
            .parameters
            .iter()
            .map(|p| p.declared_type.clone().unwrap_or_default())
            .collect()
    });

    let mut name = signature::simple_name(&raw_name).to_string();
    let is_constructor = callable.is_constructor || name == "<init>";
    let qualified_name = match owner {
        Some((_, type_qn, type_simple)) => {
            if is_constructor {
                name = type_simple.to_string();
            }
            format!("{}.{}", type_qn, name)
        }
        None if raw_name.contains('.') => raw_name.clone(),
        None => match package {
            Some(pkg) => format!("{}.{}", pkg, name),
            None => name.clone(),
        },
    };

    let parameters = callable
        .parameters
        .into_iter()
        .map(|p| Parameter {
            name: p.name.filter(|n| !n.is_empty()),
            declared_type: p.declared_type.filter(|t| !t.is_empty()),
            line: p.source_line.max(0) as usize,
            span: None,
            has_default: p.has_default,
            is_variadic: p.is_variadic,
        })
        .collect();

    let mut call_sites = Vec::new();
    if level >= AnalysisLevel::CallGraph {
        for site in callable.call_sites {
            call_sites.push(convert_call_site(origin, &qualified_name, site)?);
        }
    }

    let span = callable.span.to_span();
    let fragment = CallableFragment {
        owner: owner.map(|(index, _, _)| index),
        name,
        signature: Signature::new(
            qualified_name,
            parameter_types.iter().map(|t| signature::normalize_type(t)).collect(),
        ),
        return_type: callable.return_type.filter(|t| !t.is_empty()),
        parameters,
        modifiers: Modifiers::from_keywords(callable.modifiers, is_constructor, owner.is_some()),
        annotations: strip_at(callable.annotations),
        start_line: span.start_line,
        span,
        call_sites,
    };
    Ok((fragment, callable.comments))
}

fn convert_call_site(origin: &str, caller: &str, site: RichCallSite) -> Result<CallSiteFragment> {
    let guess_text = site.callee_signature_guess.trim().to_string();
    let explicit_name = site.method_name.filter(|m| !m.is_empty());
    if guess_text.is_empty() && explicit_name.is_none() {
        return Err(AnalysisError::ingestion(
            origin,
            format!("call site in {} has no callee guess", caller),
        ));
    }
    if site.line <= 0 {
        return Err(AnalysisError::ingestion(
            origin,
            format!("call site in {} has no source line", caller),
        ));
    }

    let head = parse_signature(&guess_text)
        .map(|(name, _)| name)
        .unwrap_or_else(|| guess_text.clone());
    let constructor_head = signature::constructor_alias(&head);
    let method_name = explicit_name
        .filter(|m| m != "<init>")
        .unwrap_or_else(|| signature::simple_name(constructor_head.as_deref().unwrap_or(&head)).to_string());

    Ok(CallSiteFragment {
        guess: CalleeGuess {
            method_name,
            receiver_expr: site.receiver_expr.filter(|r| !r.is_empty()),
            receiver_type: site.receiver_type.filter(|r| !r.is_empty()),
            argument_types: site
                .argument_types
                .into_iter()
                .map(|t| Some(t).filter(|t| !t.is_empty()))
                .collect(),
            signature: Some(guess_text).filter(|g| g.contains('(')),
            is_constructor_call: site.is_constructor_call || constructor_head.is_some(),
        },
        arguments: site.argument_expressions,
        line: site.line as usize,
        span: None,
    })
}

fn push_comments(fragment: &mut UnitFragment, comments: Vec<RichComment>, owner: Option<LocalOwner>) {
    for comment in comments {
        let Some(text) = comment.text.filter(|t| !t.is_empty()) else {
            continue;
        };
        fragment.comments.push(CommentFragment {
            text,
            span: comment.span.to_span(),
            is_doc: comment.is_doc,
            owner,
        });
    }
}

fn strip_at(annotations: Vec<String>) -> Vec<String> {
    annotations
        .into_iter()
        .map(|a| a.trim().trim_start_matches('@').to_string())
        .collect()
}
