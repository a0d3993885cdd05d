use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_MAX_FILE_UPLOADS;

/// Prefix of every upload temp file.
pub const UPLOAD_PREFIX: &str = "lark.upload.";

/// Per-file upload status. Recorded on the descriptor, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadError {
    Ok,
    /// Empty part with an empty client file name
    NoFile,
    /// No usable temp directory
    NoTmpDir,
    /// Temp file could not be created or written
    CantWrite,
}

impl UploadError {
    /// Numeric code as seen by handlers: 0, 4, 6 or 7.
    pub fn code(self) -> u8 {
        match self {
            UploadError::Ok => 0,
            UploadError::NoFile => 4,
            UploadError::NoTmpDir => 6,
            UploadError::CantWrite => 7,
        }
    }
}

/// One uploaded file part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    /// Client-supplied file name
    pub name: String,
    /// Part `Content-Type`, empty when absent
    pub content_type: String,
    /// `webkitRelativePath` when sent, otherwise the client file name
    pub full_path: String,
    /// Where the part body was spooled; `None` when nothing was written
    pub tmp_path: Option<PathBuf>,
    pub size: usize,
    pub error: UploadError,
}

impl UploadedFile {
    /// Upload succeeded and the temp file is still on disk.
    pub fn is_valid(&self) -> bool {
        self.error == UploadError::Ok && self.tmp_path.as_deref().is_some_and(Path::is_file)
    }

    /// Move the temp file to `dest`.
    ///
    /// Falls back to copy + remove when `dest` is on another filesystem.
    pub fn persist(&self, dest: impl AsRef<Path>) -> io::Result<()> {
        let src = self.tmp_path.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "upload has no temp file")
        })?;
        let dest = dest.as_ref();
        if fs::rename(src, dest).is_err() {
            fs::copy(src, dest)?;
            fs::remove_file(src)?;
        }
        Ok(())
    }

    pub fn contents(&self) -> io::Result<Vec<u8>> {
        match &self.tmp_path {
            Some(path) => fs::read(path),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "upload has no temp file",
            )),
        }
    }
}

/// Upload limits and storage location for a worker.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Temp directory override; the OS temp dir when `None`
    pub tmp_dir: Option<PathBuf>,
    /// Maximum multipart sections parsed per request
    pub max_sections: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            tmp_dir: None,
            max_sections: DEFAULT_MAX_FILE_UPLOADS,
        }
    }
}

impl UploadSettings {
    /// The directory uploads are written to, if it exists.
    pub fn resolve_tmp_dir(&self) -> Option<PathBuf> {
        let dir = self.tmp_dir.clone().unwrap_or_else(env::temp_dir);
        dir.is_dir().then_some(dir)
    }
}

/// Write `contents` to a fresh temp file in `dir` and keep it on disk.
pub(crate) fn spool(dir: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    let mut file = tempfile::Builder::new()
        .prefix(UPLOAD_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(contents)?;
    let (_, path) = file.keep().map_err(|e| e.error)?;
    Ok(path)
}

/// Remove spooled temp files. A file already moved away is not an error.
pub(crate) fn release(files: &[(String, UploadedFile)]) {
    for (field, file) in files {
        let Some(path) = &file.tmp_path else { continue };
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(field = %field, path = %path.display(), error = %e, "Failed to remove upload temp file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(UploadError::Ok.code(), 0);
        assert_eq!(UploadError::NoFile.code(), 4);
        assert_eq!(UploadError::NoTmpDir.code(), 6);
        assert_eq!(UploadError::CantWrite.code(), 7);
    }

    #[test]
    fn test_spool_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = spool(dir.path(), b"payload").unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(UPLOAD_PREFIX));
        assert_eq!(fs::read(&path).unwrap(), b"payload");

        let file = UploadedFile {
            name: "a.txt".into(),
            content_type: String::new(),
            full_path: "a.txt".into(),
            tmp_path: Some(path.clone()),
            size: 7,
            error: UploadError::Ok,
        };
        assert!(file.is_valid());
        release(&[("doc".into(), file.clone())]);
        assert!(!path.exists());
        assert!(!file.is_valid());
        // second release of a missing file is quiet
        release(&[("doc".into(), file)]);
    }

    #[test]
    fn test_missing_tmp_dir_resolves_to_none() {
        let settings = UploadSettings {
            tmp_dir: Some(PathBuf::from("/definitely/not/here")),
            ..Default::default()
        };
        assert!(settings.resolve_tmp_dir().is_none());
    }
}
