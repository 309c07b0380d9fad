//! Input discovery.
//!
//! Explicit file arguments are always kept, whatever their extension, so an
//! unsupported file named on the command line still produces a FAILED
//! result. Files found by walking a directory are filtered to supported
//! extensions, and hidden entries (dot-files and dot-directories) are
//! skipped. A [`SourceFilter`] narrows directory results further with
//! include and exclude globs.

use crate::error::DocumarkError;
use crate::processor;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Include/exclude globs applied to files found under a directory.
///
/// Globs match the path relative to the directory being scanned, with `/`
/// separators. `*` also matches `/`, so `*.pdf` selects PDFs at any depth
/// and `drafts/*` drops everything under `drafts/`. An empty include list
/// accepts every supported file.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl SourceFilter {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, DocumarkError> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// Whether a file at `relative` (to its scan root) passes the filter.
    pub fn accepts(&self, relative: &Path) -> bool {
        let rel = relative.to_string_lossy().replace('\\', "/");
        let included = self.include.as_ref().is_none_or(|set| set.is_match(&rel));
        let excluded = self.exclude.as_ref().is_some_and(|set| set.is_match(&rel));
        included && !excluded
    }
}

fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<Option<GlobSet>, DocumarkError> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns.iter().map(AsRef::as_ref).map(str::trim) {
        if pattern.is_empty() {
            continue;
        }
        let glob = Glob::new(pattern).map_err(|e| {
            DocumarkError::InvalidConfig(format!("invalid file pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
        any = true;
    }
    if !any {
        return Ok(None);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| DocumarkError::InvalidConfig(format!("invalid file patterns: {e}")))
}

/// Expand `inputs` into a sorted, de-duplicated list of source files.
///
/// Directories are scanned one level deep unless `recursive` is set, and
/// their contents must pass `filter`.
pub fn collect_sources<P: AsRef<Path>>(
    inputs: &[P],
    recursive: bool,
    filter: &SourceFilter,
) -> Result<Vec<PathBuf>, DocumarkError> {
    let mut found = BTreeSet::new();

    for input in inputs {
        let input = input.as_ref();
        if input.is_file() {
            found.insert(input.to_path_buf());
            continue;
        }
        if !input.is_dir() {
            return Err(DocumarkError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        let depth = if recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(input)
            .max_depth(depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

        for entry in walker {
            let entry = entry.map_err(|e| DocumarkError::WalkFailed {
                path: input.to_path_buf(),
                detail: e.to_string(),
            })?;
            if !entry.file_type().is_file() || !processor::is_supported(entry.path()) {
                continue;
            }
            let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
            if filter.accepts(relative) {
                found.insert(entry.into_path());
            }
        }
    }

    debug!("Collected {} source file(s)", found.len());
    Ok(found.into_iter().collect())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        for f in [
            "a.pdf",
            "b.PNG",
            "notes.xyz",
            ".hidden.txt",
            "sub/c.docx",
            "sub/deeper/d.txt",
            ".cache/e.txt",
        ] {
            fs::write(root.join(f), "x").unwrap();
        }
        tmp
    }

    fn names(paths: &[PathBuf], root: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn flat_scan_filters_unsupported_and_hidden() {
        let tmp = tree();
        let found = collect_sources(&[tmp.path()], false, &SourceFilter::default()).unwrap();
        assert_eq!(names(&found, tmp.path()), vec!["a.pdf", "b.PNG"]);
    }

    #[test]
    fn recursive_scan_descends() {
        let tmp = tree();
        let found = collect_sources(&[tmp.path()], true, &SourceFilter::default()).unwrap();
        assert_eq!(
            names(&found, tmp.path()),
            vec!["a.pdf", "b.PNG", "sub/c.docx", "sub/deeper/d.txt"]
        );
    }

    #[test]
    fn explicit_files_are_kept_and_deduplicated() {
        let tmp = tree();
        let xyz = tmp.path().join("notes.xyz");
        let pdf = tmp.path().join("a.pdf");
        let found = collect_sources(
            &[xyz.clone(), pdf.clone(), pdf.clone()],
            false,
            &SourceFilter::new(&["*.docx"], &["*.pdf"]).unwrap(),
        )
        .unwrap();
        assert_eq!(found, vec![pdf, xyz]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = collect_sources(&[tmp.path().join("missing")], false, &SourceFilter::default())
            .unwrap_err();
        assert!(matches!(err, DocumarkError::InputNotFound { .. }));
    }

    #[test]
    fn include_globs_narrow_a_directory_scan() {
        let tmp = tree();
        let filter = SourceFilter::new(&["*.pdf", "*.docx"], &[]).unwrap();
        let found = collect_sources(&[tmp.path()], true, &filter).unwrap();
        assert_eq!(names(&found, tmp.path()), vec!["a.pdf", "sub/c.docx"]);
    }

    #[test]
    fn exclude_globs_drop_matching_paths() {
        let tmp = tree();
        let filter = SourceFilter::new::<&str>(&[], &["sub/*"]).unwrap();
        let found = collect_sources(&[tmp.path()], true, &filter).unwrap();
        assert_eq!(names(&found, tmp.path()), vec!["a.pdf", "b.PNG"]);

        let filter = SourceFilter::new(&["*"], &["a.*", "*/deeper/*"]).unwrap();
        let found = collect_sources(&[tmp.path()], true, &filter).unwrap();
        assert_eq!(names(&found, tmp.path()), vec!["b.PNG", "sub/c.docx"]);
    }

    #[test]
    fn malformed_glob_is_a_config_error() {
        let err = SourceFilter::new(&["[unclosed"], &[]).unwrap_err();
        assert!(matches!(err, DocumarkError::InvalidConfig(_)), "got {err:?}");
    }
}
