use glob::Pattern;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Lines};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{utils::resolve_article_files, LoaderError, MalformedLinePolicy};
use crate::article::Article;

/// File name pattern matched when none is configured.
pub const DEFAULT_FILE_PATTERN: &str = "*.jsonl";

/// Loads [`Article`]s from the line-delimited JSON files of a directory.
///
/// The loader itself holds no state between reads: every call to
/// [`ArticleLoader::articles`] rescans the directory and starts over from the
/// first file, so a finished sequence can simply be requested again.
#[derive(Debug, Clone)]
pub struct ArticleLoader {
    base_dir: PathBuf,
    pattern: String,
    recursive: bool,
    malformed_lines: MalformedLinePolicy,
}

impl ArticleLoader {
    /// Creates a loader over `base_dir` matching `*.jsonl` files directly inside it.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pattern: DEFAULT_FILE_PATTERN.to_string(),
            recursive: false,
            malformed_lines: MalformedLinePolicy::default(),
        }
    }

    /// Glob matched against file names, `*.jsonl` by default
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Whether to descend into sub-directories, `false` by default
    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// How lines that aren't valid JSON are handled, [`MalformedLinePolicy::Skip`] by default
    #[must_use]
    pub fn malformed_lines(mut self, policy: MalformedLinePolicy) -> Self {
        self.malformed_lines = policy;
        self
    }

    /// Starts a fresh pass over the directory.
    ///
    /// # Errors
    /// Fails if the directory doesn't exist, the pattern is invalid or the
    /// directory can't be listed. Errors reading individual files surface
    /// through the returned iterator.
    pub fn articles(&self) -> Result<Articles, LoaderError> {
        if !self.base_dir.is_dir() {
            return Err(LoaderError::MissingDirectory(self.base_dir.clone()));
        }
        let pattern = Pattern::new(&self.pattern)?;
        let files = resolve_article_files(&self.base_dir, &pattern, self.recursive)?;
        debug!(
            dir = %self.base_dir.display(),
            files = files.len(),
            "resolved article files"
        );

        Ok(Articles {
            files: files.into_iter(),
            current: None,
            policy: self.malformed_lines,
            done: false,
        })
    }

    /// Reads every article into memory.
    ///
    /// # Errors
    /// Returns the first error produced by [`ArticleLoader::articles`] or by the
    /// sequence it returns.
    pub fn load_all(&self) -> Result<Vec<Article>, LoaderError> {
        self.articles()?.collect()
    }
}

struct OpenFile {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

/// Lazy sequence of articles produced by [`ArticleLoader::articles`].
///
/// The sequence ends after the first error it yields.
pub struct Articles {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<OpenFile>,
    policy: MalformedLinePolicy,
    done: bool,
}

impl Articles {
    fn fail(&mut self, err: LoaderError) -> Option<Result<Article, LoaderError>> {
        self.done = true;
        self.current = None;
        Some(Err(err))
    }
}

impl Iterator for Articles {
    type Item = Result<Article, LoaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.current.is_none() {
                let path = self.files.next()?;
                debug!(path = %path.display(), "reading article file");
                match File::open(&path) {
                    Ok(file) => {
                        self.current = Some(OpenFile {
                            lines: BufReader::new(file).lines(),
                            path,
                            line_no: 0,
                        });
                    }
                    Err(source) => return self.fail(LoaderError::Io { path, source }),
                }
            }

            let Some(open) = self.current.as_mut() else {
                continue;
            };
            let Some(line) = open.lines.next() else {
                self.current = None;
                continue;
            };
            open.line_no += 1;

            let reason = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => match Article::from_json_line(&line) {
                    Ok(Some(article)) => return Some(Ok(article)),
                    Ok(None) => {
                        debug!(
                            path = %open.path.display(),
                            line = open.line_no,
                            "discarding article without a usable body"
                        );
                        continue;
                    }
                    Err(e) => e.to_string(),
                },
                // invalid UTF-8 only spoils the current line
                Err(e) if e.kind() == ErrorKind::InvalidData => e.to_string(),
                Err(source) => {
                    let path = open.path.clone();
                    return self.fail(LoaderError::Io { path, source });
                }
            };

            match self.policy {
                MalformedLinePolicy::Skip => {
                    warn!(
                        path = %open.path.display(),
                        line = open.line_no,
                        error = %reason,
                        "skipping malformed article line"
                    );
                }
                MalformedLinePolicy::Abort => {
                    let err = LoaderError::MalformedLine {
                        path: open.path.clone(),
                        line: open.line_no,
                        reason,
                    };
                    return self.fail(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &std::path::Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_loads_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "day1.jsonl",
            "{\"id\":\"a1\",\"body\":\"Hello\\nworld\"}\n{\"id\":\"a2\",\"body\":\"   \"}\n",
        );

        let articles = ArticleLoader::new(dir.path()).load_all().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id().as_deref(), Some("a1"));
        assert_eq!(articles[0].body(), "Hello world");
    }

    #[test]
    fn test_skips_blank_and_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.jsonl",
            "\n{\"body\":\"first\"}\n{broken\n   \n{\"body\":\"second\"}\n",
        );
        write(dir.path(), "b.jsonl", "{\"body\":\"third\"}");
        write(dir.path(), "ignored.json", "{\"body\":\"nope\"}");

        let bodies: Vec<String> = ArticleLoader::new(dir.path())
            .load_all()
            .unwrap()
            .into_iter()
            .map(|a| a.body().to_string())
            .collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_abort_policy_reports_location() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.jsonl", "{\"body\":\"ok\"}\n{broken\n{\"body\":\"late\"}\n");

        let mut articles = ArticleLoader::new(dir.path())
            .malformed_lines(MalformedLinePolicy::Abort)
            .articles()
            .unwrap();

        assert!(articles.next().unwrap().is_ok());
        match articles.next() {
            Some(Err(LoaderError::MalformedLine { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected malformed line error, got {other:?}"),
        }
        assert!(articles.next().is_none());
    }

    #[test]
    fn test_restartable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.jsonl", "{\"body\":\"one\"}\n{\"body\":\"two\"}\n");

        let loader = ArticleLoader::new(dir.path());
        let first: Vec<Article> = loader.load_all().unwrap();
        let second: Vec<Article> = loader.load_all().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = ArticleLoader::new(dir.path().join("absent")).articles();
        assert!(matches!(result, Err(LoaderError::MissingDirectory(_))));
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = b"{\"body\":\"\xff\xfe\"}\n".to_vec();
        bytes.extend_from_slice(b"{\"body\":\"fine\"}\n");
        fs::write(dir.path().join("a.jsonl"), bytes).unwrap();

        let articles = ArticleLoader::new(dir.path()).load_all().unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].body(), "fine");
    }
}
