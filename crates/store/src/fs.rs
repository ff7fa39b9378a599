use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use wrgld_objects::{Digest, ObjectKind, ObjectStore, StoreError};

/// Filesystem object store: one file per object under
/// `<root>/<kind>/<hex-digest>`. Writes go through a temp file + rename so a
/// crashed write never leaves a readable partial object.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for kind in ObjectKind::ALL {
            fs::create_dir_all(root.join(kind.as_str()))?;
        }
        Ok(FsObjectStore { root })
    }

    fn path(&self, kind: ObjectKind, sum: &Digest) -> PathBuf {
        self.root.join(kind.as_str()).join(sum.to_string())
    }

    fn write(&self, path: &Path, payload: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, kind: ObjectKind, payload: &[u8]) -> Result<Digest, StoreError> {
        let sum = Digest::of(payload);
        let path = self.path(kind, &sum);
        if !path.exists() {
            self.write(&path, payload)?;
        }
        Ok(sum)
    }

    fn put_keyed(&self, kind: ObjectKind, sum: &Digest, payload: &[u8]) -> Result<(), StoreError> {
        self.write(&self.path(kind, sum), payload)
    }

    fn get(&self, kind: ObjectKind, sum: &Digest) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.path(kind, sum)) {
            Ok(b) => Ok(b),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(kind, *sum)),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, kind: ObjectKind, sum: &Digest) -> bool {
        self.path(kind, sum).exists()
    }

    fn delete(&self, kind: ObjectKind, sum: &Digest) -> Result<(), StoreError> {
        match fs::remove_file(self.path(kind, sum)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, kind: ObjectKind) -> Result<Vec<Digest>, StoreError> {
        let mut sums = Vec::new();
        for entry in fs::read_dir(self.root.join(kind.as_str()))? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(sum) = name.to_str().and_then(|s| s.parse::<Digest>().ok()) {
                sums.push(sum);
            }
        }
        Ok(sums)
    }
}
