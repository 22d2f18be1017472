use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::trace;

use super::{BlobEntry, BlobStore, StoreError, StoreOp};

/// Blob store backed by one file per blob in a directory.
///
/// The directory plays the role of the shared watchpath: any number of
/// processes may point at it. Each read holds a shared advisory lock and
/// each write an exclusive one on the blob file, so a download never sees a
/// half-written upload. File modification times are the store timestamps.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

/// Releases the advisory lock even when the read or write bails out early.
struct LockedFile<'a> {
    file: &'a File,
}

impl<'a> LockedFile<'a> {
    fn shared(file: &'a File) -> io::Result<Self> {
        FileExt::lock_shared(file)?;
        Ok(Self { file })
    }

    fn exclusive(file: &'a File) -> io::Result<Self> {
        FileExt::lock_exclusive(file)?;
        Ok(Self { file })
    }
}

impl Drop for LockedFile<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(self.file);
    }
}

impl BlobStore for FsBlobStore {
    fn get_blob(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.blob_path(path);
        let file = match File::open(&full) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::new(StoreOp::Get, path, err)),
        };

        let read = || -> io::Result<Vec<u8>> {
            let guard = LockedFile::shared(&file)?;
            let mut reader = guard.file;
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            Ok(bytes)
        };
        let bytes = read().map_err(|err| StoreError::new(StoreOp::Get, path, err))?;
        trace!(path, len = bytes.len(), "read blob");
        Ok(Some(bytes))
    }

    fn put_blob(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let write = || -> io::Result<()> {
            fs::create_dir_all(&self.root)?;
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(self.blob_path(path))?;
            let guard = LockedFile::exclusive(&file)?;
            guard.file.set_len(0)?;
            let mut writer = guard.file;
            writer.write_all(bytes)?;
            writer.flush()?;
            Ok(())
        };
        write().map_err(|err| StoreError::new(StoreOp::Put, path, err))?;
        trace!(path, len = bytes.len(), "wrote blob");
        Ok(())
    }

    fn delete_blob(&self, path: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.blob_path(path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::new(StoreOp::Delete, path, err)),
        }
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<BlobEntry>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::new(StoreOp::List, prefix, err)),
        };

        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StoreError::new(StoreOp::List, prefix, err))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                // Deleted between read_dir and stat.
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::new(StoreOp::List, name, err)),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|err| StoreError::new(StoreOp::List, name.clone(), err))?;
            children.push(BlobEntry {
                path: name,
                modified,
            });
        }
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }
}
