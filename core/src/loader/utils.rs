use glob::Pattern;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::LoaderError;

/// Lists the files under `base` whose file name matches `pattern`, sorted by path.
pub(super) fn resolve_article_files(
    base: &Path,
    pattern: &Pattern,
    recursive: bool,
) -> Result<Vec<PathBuf>, LoaderError> {
    let walker = if recursive {
        WalkDir::new(base)
    } else {
        WalkDir::new(base).max_depth(1)
    };

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| pattern.matches(name));
        if matches {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_article_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.jsonl"), "").unwrap();
        fs::write(dir.path().join("a.jsonl"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/c.jsonl"), "").unwrap();

        let pattern = Pattern::new("*.jsonl").unwrap();

        let flat = resolve_article_files(dir.path(), &pattern, false).unwrap();
        assert_eq!(
            flat,
            vec![dir.path().join("a.jsonl"), dir.path().join("b.jsonl")]
        );

        let deep = resolve_article_files(dir.path(), &pattern, true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(deep.contains(&dir.path().join("nested/c.jsonl")));
    }
}
