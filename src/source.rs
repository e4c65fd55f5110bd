//! Byte sources regions are stored in.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Region file which is created only when something is written to it.
///
/// Until then it behaves like an empty source.
#[derive(Debug)]
pub struct RegionFile {
    path: PathBuf,
    file: Option<File>,
    /// Cursor position while file does not exist.
    position: u64,
}

impl RegionFile {
    /// Opens an existing file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        Ok(RegionFile {
            path,
            file: Some(file),
            position: 0,
        })
    }

    /// Opens file if it exists, otherwise binds to the path without creating it.
    pub fn open_or_empty<P: AsRef<Path>>(path: P) -> Result<Self, io::Error> {
        let path = path.as_ref().to_path_buf();

        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Some(file),
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        Ok(RegionFile {
            path,
            file,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether file exists on disk.
    pub fn exists(&self) -> bool {
        self.file.is_some()
    }

    fn file_for_write(&mut self) -> Result<&mut File, io::Error> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }

            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&self.path)?;

            file.seek(SeekFrom::Start(self.position))?;
            self.file = Some(file);
        }

        match self.file.as_mut() {
            Some(file) => Ok(file),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "region file")),
        }
    }
}

impl Read for RegionFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl Write for RegionFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_for_write()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Seek for RegionFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        if let Some(file) = self.file.as_mut() {
            return file.seek(pos);
        }

        let position = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(offset) | SeekFrom::Current(offset) if offset >= 0 => {
                let base = match pos {
                    SeekFrom::Current(_) => self.position,
                    _ => 0,
                };
                base.checked_add(offset as u64)
            }
            SeekFrom::Current(offset) => self.position.checked_sub(offset.unsigned_abs()),
            SeekFrom::End(_) => None,
        };

        match position {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}

/// Trait adds additional helper methods for `Seek`.
pub trait SeekExt {
    fn len(&mut self) -> Result<u64, io::Error>;
}

impl<S: Seek> SeekExt for S {
    fn len(&mut self) -> Result<u64, io::Error> {
        let old_pos = self.seek(SeekFrom::Current(0))?;
        let len = self.seek(SeekFrom::End(0))?;

        if old_pos != len {
            self.seek(SeekFrom::Start(old_pos))?;
        }

        Ok(len)
    }
}

/// Trait adds additional helper methods for `Seek+Write`.
pub trait SeekWriteExt {
    fn extend_len(&mut self, new_len: u64) -> Result<(), io::Error>;
}

impl<S: Seek + Write> SeekWriteExt for S {
    fn extend_len(&mut self, new_len: u64) -> Result<(), io::Error> {
        let old_pos = self.seek(SeekFrom::Current(0))?;
        let len = self.seek(SeekFrom::End(0))?;

        if new_len > len {
            let padding_len = new_len - len;
            self.write_all(&vec![0; padding_len as usize])?;
        }

        self.seek(SeekFrom::Start(old_pos))?;

        Ok(())
    }
}

/// Sources which can be shrunk, needed to compact regions.
pub trait Truncate {
    fn truncate(&mut self, len: u64) -> Result<(), io::Error>;
}

impl Truncate for File {
    fn truncate(&mut self, len: u64) -> Result<(), io::Error> {
        self.set_len(len)
    }
}

impl Truncate for Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> Result<(), io::Error> {
        self.get_mut().truncate(len as usize);

        if self.position() > len {
            self.set_position(len);
        }

        Ok(())
    }
}

impl Truncate for RegionFile {
    fn truncate(&mut self, len: u64) -> Result<(), io::Error> {
        match self.file.as_mut() {
            Some(file) => file.set_len(len),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::source::{RegionFile, SeekExt, SeekWriteExt, Truncate};
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};
    use tempfile::tempdir;

    #[test]
    fn test_len() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        let len = cursor.len().unwrap();

        assert_eq!(len, 5);
    }

    #[test]
    fn test_extend_len() {
        let mut cursor = Cursor::new(vec![1, 2, 3, 4, 5]);
        cursor.extend_len(10).unwrap();
        let len = cursor.len().unwrap();

        assert_eq!(len, 10);
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_cursor_truncate() {
        let mut cursor = Cursor::new(vec![0; 10]);
        cursor.set_position(8);
        cursor.truncate(4).unwrap();

        assert_eq!(cursor.len().unwrap(), 4);
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn test_region_file_not_created_until_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("r.0.0.mca");
        let mut file = RegionFile::open_or_empty(&path).unwrap();

        assert!(!file.exists());
        assert_eq!(file.len().unwrap(), 0);

        let mut buffer = [0u8; 4];
        assert_eq!(file.read(&mut buffer).unwrap(), 0);
        assert!(!path.exists());

        file.seek(SeekFrom::Start(3)).unwrap();
        file.write_all(&[7, 8]).unwrap();
        file.flush().unwrap();

        assert!(file.exists());
        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 0, 7, 8]);
    }

    #[test]
    fn test_region_file_open_missing() {
        let dir = tempdir().unwrap();

        assert!(RegionFile::open(dir.path().join("r.0.0.mca")).is_err());
    }
}
