use crate::error::ChunkReadError;
use crate::position::ChunkPosition;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default extension of external chunk files.
pub const EXTERNAL_CHUNK_EXTENSION: &str = "mcc";

/// Stores chunks too large for region sectors in `c.<x>.<z>.<ext>` files.
///
/// Files contain only the compressed chunk bytes, the compression scheme
/// lives in the region sectors.
#[derive(Debug, Clone)]
pub struct ExternalChunkStore {
    /// Folder where external chunk files located, same as region files.
    folder: PathBuf,
    extension: String,
}

impl ExternalChunkStore {
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        ExternalChunkStore {
            folder: folder.as_ref().to_path_buf(),
            extension: EXTERNAL_CHUNK_EXTENSION.to_owned(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_owned();
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn path(&self, position: ChunkPosition) -> PathBuf {
        self.folder.join(file_name(position, &self.extension))
    }

    pub fn exists(&self, position: ChunkPosition) -> bool {
        self.path(position).is_file()
    }

    pub fn read(&self, position: ChunkPosition) -> Result<Vec<u8>, ChunkReadError> {
        let path = self.path(position);

        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ChunkReadError::ExternalChunkMissing { path })
            }
            Err(io_error) => Err(ChunkReadError::IOError { io_error }),
        }
    }

    /// Writes data to a temporary file first, so the final path is either
    /// absent, the previous content or complete new content.
    pub fn write(&self, position: ChunkPosition, data: &[u8]) -> Result<(), io::Error> {
        if !self.folder.exists() {
            fs::create_dir_all(&self.folder)?;
        }

        let path = self.path(position);
        let temp_path = path.with_extension(format!("{}.tmp", self.extension));

        fs::write(&temp_path, data)?;
        fs::rename(&temp_path, &path)?;

        debug!(
            target: "anvil-store",
            "Wrote {} bytes of external chunk {} to {}",
            data.len(),
            position,
            path.display()
        );

        Ok(())
    }

    /// Removes external chunk file, returns whether it existed.
    pub fn delete(&self, position: ChunkPosition) -> Result<bool, io::Error> {
        let path = self.path(position);

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(target: "anvil-store", "Removed external chunk file {}", path.display());
                Ok(true)
            }
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// External chunk file name, `c.<x>.<z>.<ext>`.
pub fn file_name(position: ChunkPosition, extension: &str) -> String {
    format!("c.{}.{}.{}", position.x, position.z, extension)
}

#[cfg(test)]
mod tests {
    use crate::error::ChunkReadError;
    use crate::external::ExternalChunkStore;
    use crate::position::ChunkPosition;
    use tempfile::tempdir;

    #[test]
    fn test_path() {
        let store = ExternalChunkStore::new("world/region");
        let path = store.path(ChunkPosition::new(-33, 7));

        assert!(path.ends_with("c.-33.7.mcc"));
        assert!(path.starts_with("world/region"));
    }

    #[test]
    fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let store = ExternalChunkStore::new(dir.path());
        let position = ChunkPosition::new(1, 2);

        store.write(position, &[1, 2, 3]).unwrap();

        assert!(store.exists(position));
        assert_eq!(store.read(position).unwrap(), vec![1, 2, 3]);
        assert!(!dir.path().join("c.1.2.mcc.tmp").exists());

        assert!(store.delete(position).unwrap());
        assert!(!store.delete(position).unwrap());
        assert!(!store.exists(position));
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        let store = ExternalChunkStore::new(dir.path()).with_extension("ext");

        match store.read(ChunkPosition::new(0, 0)).unwrap_err() {
            ChunkReadError::ExternalChunkMissing { path } => {
                assert_eq!(path, dir.path().join("c.0.0.ext"));
            }
            e => panic!("Expected `ExternalChunkMissing` but got `{:?}`", e),
        }
    }
}
