use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::format::{encode_frame, read_record, scan, RecordRef, MAGIC};
use super::{io_error, AttributeValue, Attributes, CollisionPolicy, VectorStoreError};
use crate::article::{Article, BODY_FIELD};
use crate::identity::{derive_key, EmbeddingKey};

/// Outcome of one [`StoreWriter::save`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Records written, including ones that replaced an earlier record.
    pub written: usize,
    /// Records whose key was already present in the store.
    pub overwritten: usize,
}

/// Appends records to a store file.
///
/// Only one writer may own a store at a time. Each record goes to disk as a
/// single frame, so a crash leaves a prefix of the intended records and at
/// most one torn frame, which readers skip.
pub struct StoreWriter {
    path: PathBuf,
    file: BufWriter<File>,
    policy: CollisionPolicy,
    keys: HashSet<EmbeddingKey>,
    dimensions: Option<usize>,
    /// Store that `finish` moves the staged file onto.
    target: Option<PathBuf>,
}

impl StoreWriter {
    /// Creates an empty store at `path`, replacing any file already there.
    /// Missing parent directories are created.
    ///
    /// # Errors
    /// I/O failures.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, VectorStoreError> {
        let path = path.as_ref().to_path_buf();
        ensure_parent_dir(&path)?;
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut file = BufWriter::new(file);
        file.write_all(&MAGIC).map_err(io_error(&path))?;
        debug!(path = %path.display(), "created embedding store");
        Ok(Self {
            path,
            file,
            policy: CollisionPolicy::default(),
            keys: HashSet::new(),
            dimensions: None,
            target: None,
        })
    }

    /// Stages a new store that replaces the one at `path` only on
    /// [`StoreWriter::finish`].
    ///
    /// Frames go to a sibling `<name>.tmp` file. Until `finish` renames it over
    /// `path`, an existing store stays readable and unchanged; dropping the
    /// writer unfinished discards the staged file.
    ///
    /// # Errors
    /// I/O failures.
    pub fn replace(path: impl AsRef<Path>) -> Result<Self, VectorStoreError> {
        let target = path.as_ref().to_path_buf();
        let mut writer = Self::create(staging_path(&target))?;
        writer.target = Some(target);
        Ok(writer)
    }

    /// Opens an existing store for appending, or creates it when absent.
    ///
    /// A torn trailing frame from an interrupted run is cut off first.
    ///
    /// # Errors
    /// I/O failures, or a file at `path` that isn't a store.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, VectorStoreError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Self::create(path);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(io_error(&path))?;

        let (scanned, dimensions) = {
            let mut reader = BufReader::new(&mut file);
            let scanned = scan(&mut reader, &path)?;
            let dimensions = match scanned.index.values().next() {
                Some(location) => Some(read_record(&mut reader, &path, *location)?.vector.len()),
                None => None,
            };
            (scanned, dimensions)
        };

        if scanned.torn {
            warn!(path = %path.display(), end = scanned.end, "truncating torn record before appending");
            file.set_len(scanned.end).map_err(io_error(&path))?;
        }
        file.seek(SeekFrom::Start(scanned.end))
            .map_err(io_error(&path))?;

        Ok(Self {
            file: BufWriter::new(file),
            path,
            policy: CollisionPolicy::default(),
            keys: scanned.index.into_keys().collect(),
            dimensions,
            target: None,
        })
    }

    #[must_use]
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The file frames are written to, the staging file for [`StoreWriter::replace`].
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record per article, the i-th vector belonging to the i-th article.
    ///
    /// Every record is keyed by [`derive_key`] and carries all article fields
    /// except the body. The whole batch is validated before the first frame is
    /// written; after that, records are written one at a time.
    ///
    /// # Errors
    /// * [`VectorStoreError::LengthMismatch`] - `articles` and `vectors` differ in length
    /// * [`VectorStoreError::DimensionMismatch`] - vectors don't share one dimensionality
    /// * [`VectorStoreError::DuplicateKey`] - a key repeats under [`CollisionPolicy::Reject`]
    /// * I/O and encoding failures
    pub fn save(
        &mut self,
        articles: &[Article],
        vectors: &[Vec<f32>],
    ) -> Result<SaveReport, VectorStoreError> {
        if articles.len() != vectors.len() {
            return Err(VectorStoreError::LengthMismatch {
                articles: articles.len(),
                vectors: vectors.len(),
            });
        }

        let mut staged = Vec::with_capacity(articles.len());
        let mut batch_keys = HashSet::with_capacity(articles.len());
        let mut dimensions = self.dimensions;
        for (article, vector) in articles.iter().zip(vectors) {
            let key = derive_key(article);
            match dimensions {
                None => dimensions = Some(vector.len()),
                Some(expected) if expected != vector.len() => {
                    return Err(VectorStoreError::DimensionMismatch {
                        key: key.to_string(),
                        expected,
                        found: vector.len(),
                    });
                }
                Some(_) => {}
            }
            let repeated = !batch_keys.insert(key.clone()) || self.keys.contains(&key);
            if repeated && self.policy == CollisionPolicy::Reject {
                return Err(VectorStoreError::DuplicateKey(key));
            }
            staged.push((key, vector, article_attributes(article)?));
        }

        let mut report = SaveReport::default();
        for (key, vector, attributes) in staged {
            let frame = encode_frame(&RecordRef {
                key: &key,
                vector,
                attributes: &attributes,
            })?;
            self.file.write_all(&frame).map_err(io_error(&self.path))?;
            if !self.keys.insert(key.clone()) {
                debug!(%key, "record replaced an earlier one with the same key");
                report.overwritten += 1;
            }
            report.written += 1;
        }
        self.dimensions = dimensions;
        Ok(report)
    }

    /// # Errors
    /// I/O failures.
    pub fn flush(&mut self) -> Result<(), VectorStoreError> {
        self.file.flush().map_err(io_error(&self.path))
    }

    /// Flushes buffered frames and syncs the file to disk. A staged store is
    /// then moved into place.
    ///
    /// # Errors
    /// I/O failures.
    pub fn finish(mut self) -> Result<(), VectorStoreError> {
        self.flush()?;
        self.file.get_ref().sync_all().map_err(io_error(&self.path))?;
        if let Some(target) = self.target.take() {
            if let Err(source) = fs::rename(&self.path, &target) {
                let _ = fs::remove_file(&self.path);
                return Err(VectorStoreError::Io {
                    path: target,
                    source,
                });
            }
            debug!(path = %target.display(), "replaced embedding store");
        }
        Ok(())
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        if self.target.is_some() {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to discard staged store");
            }
        }
    }
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    target.with_file_name(name)
}

fn ensure_parent_dir(path: &Path) -> Result<(), VectorStoreError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_error(parent))
        }
        _ => Ok(()),
    }
}

/// Everything but the body, scalars as-is and structures as JSON text.
fn article_attributes(article: &Article) -> Result<Attributes, VectorStoreError> {
    article
        .fields()
        .iter()
        .filter(|(name, _)| name.as_str() != BODY_FIELD)
        .map(|(name, value)| {
            AttributeValue::from_json(value)
                .map(|value| (name.clone(), value))
                .map_err(|source| VectorStoreError::Attribute {
                    name: name.clone(),
                    source,
                })
        })
        .collect()
}
