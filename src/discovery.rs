//! Build a source set from a directory tree.

use std::fs;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::adapter::{SourceInput, SourceSet};
use crate::config::DiscoveryConfig;
use crate::error::{AnalysisError, Result};
use crate::model::Language;

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "__pycache__", "venv"];

/// Collect every file of `language` under `root` into a source set.
///
/// Paths are stored relative to `root` with `/` separators and sorted, so the
/// same tree always yields the same set. A file `root` is taken as-is.
pub fn discover_source_set(
    root: &Path,
    language: Language,
    config: &DiscoveryConfig,
) -> Result<SourceSet> {
    let io_err = |path: &Path, e: &dyn std::fmt::Display| AnalysisError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    };

    let id = root.display().to_string();
    let metadata = fs::metadata(root).map_err(|e| io_err(root, &e))?;
    if metadata.is_file() {
        let contents = fs::read_to_string(root).map_err(|e| io_err(root, &e))?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| id.clone());
        return Ok(SourceSet::new(id, language, vec![SourceInput::file(name, contents)]));
    }

    let mut inputs = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.depth() > 0
                && e.file_type().is_dir()
                && (name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())))
        })
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            io_err(&path, &e)
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !language.file_extensions().contains(&ext) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        if config.is_path_excluded(relative) {
            debug!(path = %relative.display(), "excluded by configuration");
            continue;
        }
        let contents = fs::read_to_string(path).map_err(|e| io_err(path, &e))?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        inputs.push(SourceInput::file(relative, contents));
    }

    inputs.sort_by(|a, b| a.path().cmp(b.path()));
    debug!(root = %id, files = inputs.len(), %language, "discovered source set");
    Ok(SourceSet::new(id, language, inputs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/b/Order.java", "class Order {}");
        write(dir.path(), "src/a/App.java", "class App {}");
        write(dir.path(), "src/a/notes.txt", "not java");
        write(dir.path(), "build/gen/Gen.java", "class Gen {}");
        write(dir.path(), ".git/Hidden.java", "class Hidden {}");

        let config = DiscoveryConfig {
            excluded_paths: vec!["build/**".to_string()],
        };
        let set = discover_source_set(dir.path(), Language::Java, &config).unwrap();
        let paths: Vec<&str> = set.inputs.iter().map(|i| i.path()).collect();
        assert_eq!(paths, vec!["src/a/App.java", "src/b/Order.java"]);
        assert_eq!(set.inputs[0].contents(), "class App {}");
    }

    #[test]
    fn test_discover_single_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "tool.py", "def main():\n    pass\n");
        let set = discover_source_set(&dir.path().join("tool.py"), Language::Python, &DiscoveryConfig::default())
            .unwrap();
        assert_eq!(set.inputs.len(), 1);
        assert_eq!(set.inputs[0].path(), "tool.py");
    }

    #[test]
    fn test_discover_missing_root() {
        let err = discover_source_set(
            Path::new("/nonexistent/project"),
            Language::C,
            &DiscoveryConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Io { .. }));
    }
}
