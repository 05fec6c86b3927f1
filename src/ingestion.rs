//! Turn paths on disk into named input documents.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{api::NamedText, error::Result};

/// Supported file extensions for document discovery.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt"];

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
}

/// Recursively collect supported files under `dir`, skipping hidden entries.
///
/// Returned paths keep `dir` as their prefix and are sorted.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut results = Vec::new();
    walk_dir(dir, &mut results)?;
    results.sort();
    Ok(results)
}

fn walk_dir(current: &Path, results: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_dir(&path, results)?;
        } else if file_type.is_symlink() {
            // Follow links to files only; directory links could cycle.
            if path.is_file() && is_supported(&path) {
                results.push(path);
            }
        } else if file_type.is_file() && is_supported(&path) {
            results.push(path);
        }
    }
    Ok(())
}

/// Expand files and directories into the ordered list of files to read.
///
/// Explicit file arguments are taken as-is regardless of extension.
/// Missing paths are logged and skipped.
pub fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            match discover_files(path) {
                Ok(found) => files.extend(found),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to walk directory"),
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            warn!(path = %path.display(), "no such file or directory, skipping");
        }
    }
    files
}

/// Read files as named documents, named by their path.
///
/// Files that cannot be read as UTF-8 text are logged and skipped; the
/// remaining files are still returned in input order.
pub fn read_documents(files: &[PathBuf]) -> Vec<NamedText> {
    let loaded: Vec<Option<NamedText>> = files
        .par_iter()
        .map(|path| match std::fs::read_to_string(path) {
            Ok(text) => Some(NamedText::new(path.display().to_string(), text)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                None
            }
        })
        .collect();

    let documents: Vec<NamedText> = loaded.into_iter().flatten().collect();
    debug!(requested = files.len(), read = documents.len(), "read input files");
    documents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_md_and_txt() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        std::fs::write(root.join("a.md"), "# A").unwrap();
        std::fs::write(root.join("b.txt"), "B").unwrap();
        std::fs::write(root.join("c.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/d.md"), "D").unwrap();

        let files = discover_files(root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.md"),
                PathBuf::from("b.txt"),
                PathBuf::from("sub/d.md"),
            ]
        );
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(".hidden.md"), "x").unwrap();
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/notes.md"), "x").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "x").unwrap();

        assert_eq!(discover_files(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn expand_keeps_argument_order_and_skips_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("notes.log");
        std::fs::write(&file, "explicit").unwrap();
        let dir = tmp.path().join("docs");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("z.txt"), "z").unwrap();

        let files = expand_paths(&[file.clone(), tmp.path().join("missing.txt"), dir.clone()]);
        assert_eq!(files, vec![file, dir.join("z.txt")]);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let good = tmp.path().join("good.txt");
        let bad = tmp.path().join("bad.txt");
        std::fs::write(&good, "Fine.").unwrap();
        std::fs::write(&bad, [0xff, 0xfe, 0x00]).unwrap();

        let docs = read_documents(&[bad, good.clone()]);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, good.display().to_string());
        assert_eq!(docs[0].text, "Fine.");
    }
}
