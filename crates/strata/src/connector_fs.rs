//! Filesystem connector: walk a directory and turn matching files into
//! [`SourceItem`]s.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use strata_core::models::SourceItem;

use crate::config::FilesystemConnectorConfig;

pub const SOURCE: &str = "filesystem";

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Scan the connector root. Items are sorted by relative path.
pub fn scan_filesystem(fs_config: &FilesystemConnectorConfig) -> Result<Vec<SourceItem>> {
    let root = &fs_config.root;
    if !root.exists() {
        bail!(
            "Filesystem connector root does not exist: {}",
            root.display()
        );
    }

    let include_set = build_globset(&fs_config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(fs_config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut items = Vec::new();
    for entry in WalkDir::new(root).follow_links(fs_config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");
        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match file_to_source_item(path, &rel_str) {
            Ok(item) => items.push(item),
            Err(e) => tracing::warn!(path = %rel_str, error = %e, "skipping unreadable file"),
        }
    }

    items.sort_by(|a, b| a.source_id.cmp(&b.source_id));
    Ok(items)
}

fn file_to_source_item(path: &Path, relative_path: &str) -> Result<SourceItem> {
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let body = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("{}: {}", path.display(), e))?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());

    Ok(SourceItem {
        source: SOURCE.to_string(),
        source_id: relative_path.to_string(),
        source_url: Some(format!("file://{}", path.display())),
        title,
        content_type: content_type(path).to_string(),
        body,
        updated_at: timestamp(modified_secs),
    })
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") => "text/markdown",
        _ => "text/plain",
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_respects_globs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("docs/a.md"), "# A").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "plain").unwrap();
        std::fs::write(dir.path().join("image.png"), "x").unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/readme.md"), "dep").unwrap();

        let config = FilesystemConnectorConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec![],
            follow_symlinks: false,
        };
        let items = scan_filesystem(&config).unwrap();
        let ids: Vec<&str> = items.iter().map(|i| i.source_id.as_str()).collect();
        assert_eq!(ids, vec!["docs/a.md", "notes.txt"]);
        assert_eq!(items[0].content_type, "text/markdown");
    }

    #[test]
    fn test_missing_root_errors() {
        let config = FilesystemConnectorConfig {
            root: "/definitely/not/here".into(),
            include_globs: vec![],
            exclude_globs: vec![],
            follow_symlinks: false,
        };
        assert!(scan_filesystem(&config).is_err());
    }
}
