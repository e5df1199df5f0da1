//! Enrollment set and cached durable store

use crate::codec::{self, EnrollmentKind};
use crate::StorageError;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Ordered collection of fixed-length embedding vectors for one user.
///
/// An empty set means "not enrolled".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrollmentSet {
    vectors: Vec<Vec<f32>>,
}

impl EnrollmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a vector; all vectors in a set share one dimension
    pub fn push(&mut self, vector: Vec<f32>) -> Result<(), StorageError> {
        if vector.is_empty() {
            return Err(StorageError::EmptyVector);
        }
        if let Some(expected) = self.dimension() {
            if vector.len() != expected {
                return Err(StorageError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }
        self.vectors.push(vector);
        Ok(())
    }

    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.iter().map(|v| v.as_slice())
    }

    /// Vector dimension, `None` when empty
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(|v| v.len())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

/// One durable blob plus the in-memory cache mirroring it.
///
/// Readers share the cache through `snapshot`; `append` and `clear` hold the
/// write lock across the disk write so a reader never observes a set that
/// differs from what is on disk.
pub struct EnrollmentStore {
    path: PathBuf,
    kind: EnrollmentKind,
    cache: RwLock<Option<Arc<EnrollmentSet>>>,
}

impl EnrollmentStore {
    /// Create a store backed by `path`; nothing is read until first use
    pub fn new(path: impl Into<PathBuf>, kind: EnrollmentKind) -> Self {
        let path = path.into();
        info!("Enrollment store for {:?} at {}", kind, path.display());
        Self {
            path,
            kind,
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> EnrollmentKind {
        self.kind
    }

    /// Current enrollment set, loading it from disk on first use.
    ///
    /// Unreadable or corrupt blobs degrade to an empty set.
    pub fn snapshot(&self) -> Arc<EnrollmentSet> {
        if let Ok(cache) = self.cache.read() {
            if let Some(set) = cache.as_ref() {
                return Arc::clone(set);
            }
        }

        let mut cache = match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(set) = cache.as_ref() {
            return Arc::clone(set);
        }
        let set = Arc::new(self.load_or_empty());
        *cache = Some(Arc::clone(&set));
        set
    }

    /// Append one vector and persist the whole set; returns the new count
    pub fn append(&self, vector: Vec<f32>) -> Result<usize, StorageError> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        let mut set = match cache.as_ref() {
            Some(set) => set.as_ref().clone(),
            None => self.load_or_empty(),
        };
        set.push(vector)?;
        self.persist(&set)?;

        let count = set.len();
        *cache = Some(Arc::new(set));
        debug!("{:?} enrollment appended, {} stored", self.kind, count);
        Ok(count)
    }

    /// Delete the persisted set. Idempotent.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;

        match fs::remove_file(&self.path) {
            Ok(()) => info!("{:?} enrollment cleared", self.kind),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *cache = Some(Arc::new(EnrollmentSet::new()));
        Ok(())
    }

    fn load_or_empty(&self) -> EnrollmentSet {
        match self.load() {
            Ok(set) => {
                debug!("{:?} enrollment loaded ({} vectors)", self.kind, set.len());
                set
            }
            Err(StorageError::Io(e)) if e.kind() == ErrorKind::NotFound => EnrollmentSet::new(),
            Err(e) => {
                warn!(
                    "Unreadable {:?} enrollment at {}: {}. Treating as not enrolled",
                    self.kind,
                    self.path.display(),
                    e
                );
                EnrollmentSet::new()
            }
        }
    }

    fn load(&self) -> Result<EnrollmentSet, StorageError> {
        let bytes = fs::read(&self.path)?;
        codec::decode(self.kind, &bytes)
    }

    fn persist(&self, set: &EnrollmentSet) -> Result<(), StorageError> {
        let blob = codec::encode(self.kind, set)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&blob)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> EnrollmentStore {
        EnrollmentStore::new(dir.path().join("face.enrl"), EnrollmentKind::Face)
    }

    #[test]
    fn test_missing_blob_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_append_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.append(vec![1.0, 2.0]).unwrap(), 1);
        assert_eq!(store.append(vec![3.0, 4.0]).unwrap(), 2);

        // A fresh store reads the same blob back
        let reopened = store_in(&dir);
        let set = reopened.snapshot();
        assert_eq!(set.len(), 2);
        assert_eq!(set.vectors()[1], vec![3.0, 4.0]);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            store.append(vec![1.0]),
            Err(StorageError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_empty_vector_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(store.append(vec![]), Err(StorageError::EmptyVector)));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(vec![1.0]).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.snapshot().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupt_blob_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.enrl");
        fs::write(&path, b"definitely not an enrollment blob").unwrap();

        let store = EnrollmentStore::new(&path, EnrollmentKind::Face);
        assert!(store.snapshot().is_empty());

        // Enrolling over a corrupt blob replaces it
        store.append(vec![0.5, 0.5]).unwrap();
        let reopened = EnrollmentStore::new(&path, EnrollmentKind::Face);
        assert_eq!(reopened.snapshot().len(), 1);
    }

    #[test]
    fn test_snapshot_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.append(vec![1.0]).unwrap();
        let first = store.snapshot();

        // Deleting the file behind the store's back does not affect the cache
        fs::remove_file(store.path()).unwrap();
        let second = store.snapshot();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
