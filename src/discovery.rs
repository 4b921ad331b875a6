//! File discovery under the configured base paths.
//!
//! Walks every base path, keeps regular files whose path relative to the base
//! matches an include glob and no exclude glob, and drops files larger than
//! `max_file_size`. `.git`, `target`, and `node_modules` are always excluded.

use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Every indexable file under `config.base_paths`, sorted and deduplicated.
pub fn discover(config: &IndexConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(config.include_globs.iter().map(String::as_str))?;
    let exclude_set = build_globset(
        DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(config.exclude_globs.iter().map(String::as_str)),
    )?;

    let mut files = Vec::new();
    for root in &config.base_paths {
        if !root.exists() {
            return Err(IndexError::fs(root, "base path does not exist"));
        }

        let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) if meta.len() > config.max_file_size => {
                    debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file without metadata");
                    continue;
                }
            }

            files.push(path.to_path_buf());
        }
    }

    // Sort for deterministic ordering
    files.sort();
    files.dedup();
    Ok(files)
}

fn build_globset<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| IndexError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| IndexError::Config(format!("invalid glob set: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn config(root: PathBuf) -> IndexConfig {
        IndexConfig {
            collection: "test".into(),
            registry_path: root.join("registry.sqlite"),
            base_paths: vec![root],
            include_globs: vec!["**/*.md".into(), "**/*.ts".into()],
            exclude_globs: vec!["drafts/**".into()],
            max_file_size: 64,
            incremental: true,
            workers: 1,
            follow_symlinks: false,
        }
    }

    #[test]
    fn applies_globs_defaults_and_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::create_dir_all(root.join("drafts")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("docs/a.md"), "# A").unwrap();
        fs::write(root.join("src.ts"), "export const x = 1").unwrap();
        fs::write(root.join("notes.txt"), "not included").unwrap();
        fs::write(root.join("drafts/b.md"), "# B").unwrap();
        fs::write(root.join("node_modules/pkg/c.md"), "# C").unwrap();
        fs::write(root.join("big.md"), "x".repeat(100)).unwrap();

        let files = discover(&config(root.to_path_buf())).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["docs/a.md", "src.ts"]);
    }

    #[test]
    fn missing_base_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&config(dir.path().join("absent"))).unwrap_err();
        assert!(matches!(err, IndexError::FileSystem { .. }));
    }

    #[test]
    fn invalid_glob_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path().to_path_buf());
        cfg.include_globs = vec!["[".into()];
        assert!(matches!(discover(&cfg), Err(IndexError::Config(_))));
    }
}
