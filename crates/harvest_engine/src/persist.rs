//! Whole-file replacement through a sibling temp file, so readers never see a
//! half-written record or manifest.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{} is not a writable directory: {source}", dir.display())]
    NotWritable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    /// Creates `dir` if it is missing and checks once that files can be created in it.
    pub fn create(dir: PathBuf) -> Result<Self, PersistError> {
        let probe = fs::create_dir_all(&dir).and_then(|()| NamedTempFile::new_in(&dir));
        match probe {
            Ok(_) => Ok(Self { dir }),
            Err(source) => Err(PersistError::NotWritable { dir, source }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates or replaces `{dir}/{filename}`.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let path = self.dir.join(filename);
        let result = NamedTempFile::new_in(&self.dir).and_then(|mut tmp| {
            tmp.write_all(content)?;
            tmp.as_file_mut().sync_all()?;
            tmp.persist(&path).map_err(|err| err.error)
        });
        match result {
            Ok(_) => Ok(path),
            Err(source) => Err(PersistError::Write { path, source }),
        }
    }
}
