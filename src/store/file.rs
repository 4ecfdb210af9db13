//! File-backed storage tier.

use std::path::{Path, PathBuf};

use tracing::instrument;

use super::{KeyValueStore, StoreError};

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const DIR_MODE: u32 = 0o700;

/// Durable key-value tier: one file per key under `dir`.
///
/// On Unix the directory is private to the owner (0700) and every token file
/// is 0600. A value is written to `{key}.tmp` first and renamed into place,
/// so a crash never leaves a half-written token behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    fn ensure_dir(&self) -> Result<(), StoreError> {
        if self.dir.exists() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            StoreError::Io(format!(
                "cannot create token directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(DIR_MODE);
            std::fs::set_permissions(&self.dir, perms).map_err(|e| {
                StoreError::Io(format!(
                    "cannot restrict token directory {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn write_temp(&self, temp_path: &Path, value: &str) -> Result<(), StoreError> {
        let io_err = |e: std::io::Error| {
            StoreError::Io(format!(
                "cannot stage token file {}: {}",
                temp_path.display(),
                e
            ))
        };

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(FILE_MODE)
                .open(temp_path)
                .map_err(io_err)?;
            file.write_all(value.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        #[cfg(not(unix))]
        {
            std::fs::write(temp_path, value).map_err(io_err)?;
        }

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    #[instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(content) if content.is_empty() => Ok(None),
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!(
                "cannot read token file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    #[instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        self.ensure_dir()?;

        let staged = path.with_extension("tmp");
        self.write_temp(&staged, value)?;

        if let Err(e) = std::fs::rename(&staged, &path) {
            let _ = std::fs::remove_file(&staged);
            return Err(StoreError::Io(format!(
                "cannot move {} into place as {}: {}",
                staged.display(),
                path.display(),
                e
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(format!(
                "cannot delete token file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.key_path(key)?.exists())
    }

    fn name(&self) -> &str {
        "file"
    }
}
