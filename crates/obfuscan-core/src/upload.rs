//! Scoped on-disk copies of uploaded packages.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

/// An uploaded package copied to a temporary `.apk` file.
///
/// The file is removed when this value is dropped, whichever way the
/// analysis that used it ended.
#[derive(Debug)]
pub struct StagedUpload {
    file: NamedTempFile,
    len: u64,
}

impl StagedUpload {
    /// Copy `reader` into a new temporary file, in `dir` when given or the
    /// system temporary directory otherwise.
    pub fn from_reader<R: Read>(mut reader: R, dir: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("obfuscan-upload-").suffix(".apk");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let len = io::copy(&mut reader, &mut file)?;
        file.flush()?;
        debug!(path = %file.path().display(), bytes = len, "staged upload");
        Ok(Self { file, len })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        debug!(path = %self.file.path().display(), "removing staged upload");
    }
}

/// Compute the SHA-256 hash of a file as lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
