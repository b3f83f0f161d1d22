//! Engine configuration.
//!
//! Loaded from YAML. Every section is optional; an empty document yields the
//! defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};
use crate::inference::CrudOperation;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub resolution: ResolutionConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl EngineConfig {
    /// Parse and validate a configuration file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| AnalysisError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse and validate a configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = if content.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| AnalysisError::Config {
                reason: e.to_string(),
            })?
        };
        validate(&config)?;
        Ok(config)
    }
}

/// Source discovery settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct DiscoveryConfig {
    /// Glob patterns for paths to skip (e.g. `**/build/**`).
    #[serde(default)]
    pub excluded_paths: Vec<String>,
}

impl DiscoveryConfig {
    /// Check if a path should be excluded based on `excluded_paths` patterns.
    pub fn is_path_excluded(&self, path: &Path) -> bool {
        if self.excluded_paths.is_empty() {
            return false;
        }

        let path_str = path.to_string_lossy();
        self.excluded_paths.iter().any(|pattern| {
            globset::Glob::new(pattern)
                .map(|glob| glob.compile_matcher().is_match(&*path_str))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct IngestionConfig {
    /// Accept files whose syntax trees contain ERROR nodes.
    #[serde(default)]
    pub tolerate_parse_errors: bool,
}

/// One rule of the overload tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Every known argument type equals the parameter type.
    ExactType,
    /// Every known argument type is assignable to the parameter type.
    AssignableType,
    /// Earliest declaration by id.
    FirstDeclared,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResolutionConfig {
    #[serde(default = "ResolutionConfig::default_tie_break")]
    pub tie_break: Vec<TieBreak>,
}

impl ResolutionConfig {
    pub fn default_tie_break() -> Vec<TieBreak> {
        vec![
            TieBreak::ExactType,
            TieBreak::AssignableType,
            TieBreak::FirstDeclared,
        ]
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            tie_break: Self::default_tie_break(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InferenceConfig {
    /// Classifier names to skip.
    #[serde(default)]
    pub disabled_classifiers: Vec<String>,
    /// Annotations marking a type as a persistent entity.
    #[serde(default = "InferenceConfig::default_persistence_annotations")]
    pub persistence_annotations: Vec<String>,
    /// Supertypes (simple names) marking a type as a persistent entity.
    #[serde(default = "InferenceConfig::default_persistence_supertypes")]
    pub persistence_supertypes: Vec<String>,
    /// Method name -> CRUD operation; consulted before built-in markers.
    #[serde(default)]
    pub crud_overrides: BTreeMap<String, CrudOperation>,
    /// Annotations marking a callable as an entry point.
    #[serde(default = "InferenceConfig::default_entry_point_annotations")]
    pub entry_point_annotations: Vec<String>,
    /// Annotations marking a whole type as an entry point.
    #[serde(default = "InferenceConfig::default_entry_point_type_annotations")]
    pub entry_point_type_annotations: Vec<String>,
}

impl InferenceConfig {
    fn default_persistence_annotations() -> Vec<String> {
        to_strings(&["Entity", "Table", "Document", "MappedSuperclass", "Embeddable"])
    }

    fn default_persistence_supertypes() -> Vec<String> {
        to_strings(&["Model", "Document", "Base", "DeclarativeBase"])
    }

    fn default_entry_point_annotations() -> Vec<String> {
        to_strings(&[
            "GetMapping",
            "PostMapping",
            "PutMapping",
            "DeleteMapping",
            "PatchMapping",
            "RequestMapping",
            "GET",
            "POST",
            "PUT",
            "DELETE",
            "KafkaListener",
            "JmsListener",
            "Scheduled",
        ])
    }

    fn default_entry_point_type_annotations() -> Vec<String> {
        to_strings(&["RestController", "Controller", "WebServlet", "Path"])
    }

    pub fn is_disabled(&self, classifier: &str) -> bool {
        self.disabled_classifiers.iter().any(|c| c == classifier)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            disabled_classifiers: Vec::new(),
            persistence_annotations: Self::default_persistence_annotations(),
            persistence_supertypes: Self::default_persistence_supertypes(),
            crud_overrides: BTreeMap::new(),
            entry_point_annotations: Self::default_entry_point_annotations(),
            entry_point_type_annotations: Self::default_entry_point_type_annotations(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Validate a configuration.
pub fn validate(config: &EngineConfig) -> Result<()> {
    let tie_break = &config.resolution.tie_break;
    if tie_break.is_empty() {
        return Err(AnalysisError::Config {
            reason: "resolution.tie_break must name at least one rule".to_string(),
        });
    }
    for (i, rule) in tie_break.iter().enumerate() {
        if tie_break[..i].contains(rule) {
            return Err(AnalysisError::Config {
                reason: format!("resolution.tie_break lists {:?} more than once", rule),
            });
        }
    }

    for pattern in &config.discovery.excluded_paths {
        globset::Glob::new(pattern).map_err(|e| AnalysisError::Config {
            reason: format!("invalid excluded path pattern '{}': {}", pattern, e),
        })?;
    }

    for name in &config.inference.disabled_classifiers {
        if !crate::inference::CLASSIFIER_NAMES.contains(&name.as_str()) {
            return Err(AnalysisError::Config {
                reason: format!("unknown classifier '{}'", name),
            });
        }
    }
    Ok(())
}
