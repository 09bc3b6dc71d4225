use std::collections::{btree_map, BTreeMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::format::{read_record, scan, FrameLocation};
use super::{io_error, LoadedEmbeddings, StoredRecord, VectorStoreError};
use crate::identity::EmbeddingKey;

/// Read-only handle on a store file.
///
/// Opening scans the file once to build a key index; records are then read on
/// demand by seeking to their frame, so the corpus is never held in memory as
/// a whole. Keys enumerate in ascending order, which is unrelated to the order
/// records were written in.
pub struct EmbeddingStore {
    path: PathBuf,
    reader: BufReader<File>,
    index: BTreeMap<EmbeddingKey, FrameLocation>,
    frames: usize,
}

impl EmbeddingStore {
    /// # Errors
    /// Fails if the file can't be opened, isn't a store, or holds a corrupt frame.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VectorStoreError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(io_error(&path))?;
        let mut reader = BufReader::new(file);
        let scanned = scan(&mut reader, &path)?;
        debug!(
            path = %path.display(),
            keys = scanned.index.len(),
            frames = scanned.frames,
            "opened embedding store"
        );
        Ok(Self {
            path,
            reader,
            index: scanned.index,
            frames: scanned.frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of complete frames in the file, superseded ones included.
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn keys(&self) -> impl Iterator<Item = &EmbeddingKey> + '_ {
        self.index.keys()
    }

    pub fn contains(&self, key: &EmbeddingKey) -> bool {
        self.index.contains_key(key)
    }

    /// Random access by key.
    ///
    /// # Errors
    /// I/O failures and corrupt frames.
    pub fn get(&mut self, key: &EmbeddingKey) -> Result<Option<StoredRecord>, VectorStoreError> {
        let Some(location) = self.index.get(key).copied() else {
            return Ok(None);
        };
        read_record(&mut self.reader, &self.path, location).map(Some)
    }

    /// Every live record, in key order.
    pub fn records(&mut self) -> Records<'_> {
        Records {
            reader: &mut self.reader,
            path: &self.path,
            locations: self.index.iter(),
        }
    }

    /// Collects vectors, keys and the named attributes of every record.
    ///
    /// # Errors
    /// Besides read failures, fails when two records disagree on dimensionality.
    pub fn load_attributes(&mut self, names: &[&str]) -> Result<LoadedEmbeddings, VectorStoreError> {
        let mut loaded = LoadedEmbeddings::default();
        let mut dimensions = None;
        for record in self.records() {
            let mut record = record?;
            match dimensions {
                None => dimensions = Some(record.vector.len()),
                Some(expected) if expected != record.vector.len() => {
                    return Err(VectorStoreError::DimensionMismatch {
                        key: record.key.to_string(),
                        expected,
                        found: record.vector.len(),
                    });
                }
                Some(_) => {}
            }
            let attributes = names
                .iter()
                .filter_map(|name| record.attributes.remove_entry(*name))
                .collect();
            loaded.keys.push(record.key);
            loaded.vectors.push(record.vector);
            loaded.attributes.push(attributes);
        }
        Ok(loaded)
    }
}

/// Iterator returned by [`EmbeddingStore::records`].
pub struct Records<'a> {
    reader: &'a mut BufReader<File>,
    path: &'a Path,
    locations: btree_map::Iter<'a, EmbeddingKey, FrameLocation>,
}

impl Iterator for Records<'_> {
    type Item = Result<StoredRecord, VectorStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, location) = self.locations.next()?;
        Some(read_record(&mut *self.reader, self.path, *location))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.locations.size_hint()
    }
}
