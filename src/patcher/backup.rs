//! Pristine copies of game binaries taken before their first modification.
//!
//! The store lives in a backup folder shared by all games and is keyed by game name:
//!
//! ```text
//! Games/
//! ├── Demo.md5           checksum of the pristine primary binary, marks a completed backup
//! ├── Demo.dll           pristine primary binary
//! └── Demo/
//!     ├── Other.dll      pristine secondary binary
//!     └── Other.dll.md5
//! ```

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{cache::Checksum, Error, Result};

/// Backups of one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupStore {
    dir: PathBuf,
    game: String,
}

impl BackupStore {
    /// Backups of `game` inside `backup_dir`
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>, game: &str) -> Self {
        BackupStore {
            dir: backup_dir.into(),
            game: game.to_string(),
        }
    }

    /// Checksum marker of the primary backup
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(format!("{}.md5", self.game))
    }

    /// Copy of the pristine primary binary
    #[must_use]
    pub fn primary_backup_path(&self) -> PathBuf {
        self.dir.join(format!("{}.dll", self.game))
    }

    /// Copy of the pristine secondary binary called `file_name`
    #[must_use]
    pub fn secondary_backup_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(&self.game).join(file_name)
    }

    /// True once the primary binary has been backed up
    #[must_use]
    pub fn has_primary_backup(&self) -> bool {
        self.marker_path().is_file()
    }

    /// Backs up `primary` unless a backup already exists.
    ///
    /// Returns true if a backup was taken. An existing backup file is never overwritten.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] naming the file that could not be read or written.
    pub fn backup_primary(&self, primary: &Path) -> Result<bool> {
        if self.has_primary_backup() {
            return Ok(false);
        }

        let backup = self.primary_backup_path();
        copy_once(primary, &backup)?;
        write_marker(&self.marker_path(), &Checksum::of_file(primary)?)?;
        info!(game = %self.game, path = %backup.display(), "Backed up game binary");
        Ok(true)
    }

    /// Backs up a secondary binary the first time it is about to be modified.
    ///
    /// Returns true if a backup was taken.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] naming the file that could not be read or written.
    pub fn backup_secondary(&self, binary: &Path) -> Result<bool> {
        let backup = self.secondary_backup_path(&file_name(binary)?);
        let marker = marker_for(&backup);
        if marker.is_file() {
            return Ok(false);
        }

        copy_once(binary, &backup)?;
        write_marker(&marker, &Checksum::of_file(binary)?)?;
        info!(game = %self.game, path = %backup.display(), "Backed up game binary");
        Ok(true)
    }

    /// Overwrites `primary` with its pristine copy.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] naming the missing backup or the failed copy.
    pub fn restore_primary(&self, primary: &Path) -> Result<()> {
        restore(&self.primary_backup_path(), primary)
    }

    /// Overwrites the secondary binary at `binary` with its pristine copy.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] naming the missing backup or the failed copy.
    pub fn restore_secondary(&self, binary: &Path) -> Result<()> {
        restore(&self.secondary_backup_path(&file_name(binary)?), binary)
    }

    /// Compares `primary` with the checksum recorded at backup time.
    ///
    /// Without a marker the binary is assumed to be unmodified.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] if `primary` or the marker cannot be read.
    pub fn is_modified(&self, primary: &Path) -> Result<bool> {
        let marker = self.marker_path();
        let stored = match fs::read_to_string(&marker) {
            Ok(stored) => stored,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(game = %self.game, "No backup checksum found, assuming unmodified binary");
                return Ok(false);
            }
            Err(e) => return Err(Error::io(marker, e)),
        };

        Ok(!Checksum::of_file(primary)?.matches(&stored))
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })
}

fn marker_for(backup: &Path) -> PathBuf {
    let mut marker = backup.as_os_str().to_os_string();
    marker.push(".md5");
    PathBuf::from(marker)
}

/// Copies `source` to `backup` unless `backup` exists
fn copy_once(source: &Path, backup: &Path) -> Result<()> {
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    if backup.exists() {
        warn!(path = %backup.display(), "Backup exists without checksum marker, keeping it");
        return Ok(());
    }
    fs::copy(source, backup).map_err(|e| Error::io(source, e))?;
    Ok(())
}

fn write_marker(marker: &Path, checksum: &Checksum) -> Result<()> {
    fs::write(marker, checksum.to_hex()).map_err(|e| Error::io(marker, e))
}

fn restore(backup: &Path, target: &Path) -> Result<()> {
    if !backup.is_file() {
        return Err(Error::io(
            backup,
            io::Error::new(io::ErrorKind::NotFound, "backup not found"),
        ));
    }
    fs::copy(backup, target).map_err(|e| Error::io(target, e))?;
    info!(path = %target.display(), "Restored game binary");
    Ok(())
}
