//! Discovery of the folders and files of an installed game.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{patcher::PatcherConfig, Error, Result};

/// Suffix of the folder holding a game's data
const DATA_DIR_SUFFIX: &str = "_data";

/// Executables whose name contains this are engine tools, not the game
const ENGINE_EXECUTABLE_MARKER: &str = "unity";

/// Paths of one game installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    root: PathBuf,
    name: String,
    managed_dir: PathBuf,
    primary_assembly: PathBuf,
    patches_dir: PathBuf,
    library_dir: PathBuf,
    compiled_dir: PathBuf,
    source_extension: String,
}

impl GameLayout {
    /// Inspects `game_path`.
    ///
    /// The game name is the stem of the first `*.exe` (by file name) that does not contain
    /// "unity". The binaries live in the `managed_dir` child of the first folder ending in
    /// `_Data`. All name comparisons ignore ASCII case.
    ///
    /// # Errors
    /// Returns [`crate::Error::GameLayout`] if the executable, data or managed folder is
    /// missing, and [`crate::Error::Io`] naming the primary binary if it does not exist.
    pub fn discover(game_path: &Path, config: &PatcherConfig) -> Result<GameLayout> {
        let entries = sorted_entries(game_path)?;

        let executable = entries
            .iter()
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
            })
            .find(|path| !file_name_lower(path).contains(ENGINE_EXECUTABLE_MARKER))
            .ok_or_else(|| {
                Error::GameLayout(format!(
                    "No game executable found in {}",
                    game_path.display()
                ))
            })?;
        let name = executable
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let data_dir = entries
            .iter()
            .find(|path| path.is_dir() && file_name_lower(path).ends_with(DATA_DIR_SUFFIX))
            .ok_or_else(|| {
                Error::GameLayout(format!(
                    "No directory ending with \"_Data\" in {}",
                    game_path.display()
                ))
            })?;

        let managed_dir = sorted_entries(data_dir)?
            .into_iter()
            .find(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .is_some_and(|n| n.eq_ignore_ascii_case(&config.managed_dir))
            })
            .ok_or_else(|| {
                Error::GameLayout(format!(
                    "No \"{}\" directory in {}",
                    config.managed_dir,
                    data_dir.display()
                ))
            })?;

        let primary_assembly = managed_dir.join(&config.primary_assembly);
        if !primary_assembly.is_file() {
            return Err(Error::io(
                primary_assembly,
                io::Error::new(io::ErrorKind::NotFound, "primary game binary not found"),
            ));
        }

        let patches_dir = game_path.join(&config.patches_dir);
        debug!(game = %name, managed = %managed_dir.display(), "Discovered game layout");

        Ok(GameLayout {
            root: game_path.to_path_buf(),
            name,
            library_dir: patches_dir.join(&config.library_dir),
            patches_dir,
            compiled_dir: game_path.join(&config.compiled_dir),
            managed_dir,
            primary_assembly,
            source_extension: config.source_extension.clone(),
        })
    }

    /// Game folder
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Game name, the stem of its executable
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Folder holding the game binaries
    #[must_use]
    pub fn managed_dir(&self) -> &Path {
        &self.managed_dir
    }

    /// Path of the primary game binary
    #[must_use]
    pub fn primary_assembly(&self) -> &Path {
        &self.primary_assembly
    }

    /// File name of the primary game binary
    #[must_use]
    pub fn primary_file_name(&self) -> String {
        self.primary_assembly
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path of the game binary called `file_name`
    #[must_use]
    pub fn assembly_path(&self, file_name: &str) -> PathBuf {
        self.managed_dir.join(file_name)
    }

    /// Patch source folder
    #[must_use]
    pub fn patches_dir(&self) -> &Path {
        &self.patches_dir
    }

    /// Private library folder inside the patch folder
    #[must_use]
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    /// Compiled artifact folder
    #[must_use]
    pub fn compiled_dir(&self) -> &Path {
        &self.compiled_dir
    }

    /// Creates the patch, library and compiled folders if they are missing.
    ///
    /// # Errors
    /// Returns [`crate::Error::Io`] naming the folder that could not be created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.patches_dir, &self.library_dir, &self.compiled_dir] {
            if !dir.is_dir() {
                debug!(path = %dir.display(), "Creating directory");
                fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
            }
        }
        Ok(())
    }

    /// Patch sources in the patch folder, sorted by path.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingDirectory`] if the patch folder is gone.
    pub fn source_files(&self) -> Result<Vec<PathBuf>> {
        if !self.patches_dir.is_dir() {
            return Err(Error::MissingDirectory(self.patches_dir.clone()));
        }

        Ok(sorted_entries(&self.patches_dir)?
            .into_iter()
            .filter(|path| path.is_file())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.source_extension))
            })
            .collect())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| Error::io(dir, e))?;
    entries.sort();
    Ok(entries)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("UnityCrashHandler64.exe"), b"").unwrap();
        fs::write(dir.path().join("Demo.exe"), b"").unwrap();
        let managed = dir.path().join("Demo_Data").join("Managed");
        fs::create_dir_all(&managed).unwrap();
        fs::write(managed.join("Assembly-CSharp.dll"), b"MZ").unwrap();
        dir
    }

    #[test]
    fn discovers_game() -> Result<()> {
        let dir = game_dir();
        let layout = GameLayout::discover(dir.path(), &PatcherConfig::default())?;

        assert_eq!(layout.name(), "Demo");
        assert_eq!(
            layout.primary_assembly(),
            dir.path().join("Demo_Data/Managed/Assembly-CSharp.dll")
        );
        assert_eq!(layout.primary_file_name(), "Assembly-CSharp.dll");
        assert_eq!(layout.library_dir(), dir.path().join("Patches/Lib"));
        assert_eq!(layout.compiled_dir(), dir.path().join("CompiledPatches"));
        Ok(())
    }

    #[test]
    fn only_engine_executables() {
        let dir = game_dir();
        fs::remove_file(dir.path().join("Demo.exe")).unwrap();

        let result = GameLayout::discover(dir.path(), &PatcherConfig::default());
        assert!(matches!(result, Err(Error::GameLayout(_))));
    }

    #[test]
    fn data_folder_case_is_ignored() -> Result<()> {
        let dir = game_dir();
        fs::rename(dir.path().join("Demo_Data"), dir.path().join("Demo_DATA")).unwrap();

        let layout = GameLayout::discover(dir.path(), &PatcherConfig::default())?;
        assert!(layout.managed_dir().ends_with("Demo_DATA/Managed"));
        Ok(())
    }

    #[test]
    fn missing_primary_names_path() {
        let dir = game_dir();
        let config = PatcherConfig::default().with_primary_assembly("Game.dll");

        match GameLayout::discover(dir.path(), &config) {
            Err(Error::Io { path, .. }) => assert!(path.ends_with("Managed/Game.dll")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn directories_and_sources() -> Result<()> {
        let dir = game_dir();
        let layout = GameLayout::discover(dir.path(), &PatcherConfig::default())?;

        assert!(matches!(layout.source_files(), Err(Error::MissingDirectory(_))));
        layout.ensure_directories()?;
        layout.ensure_directories()?;
        assert!(layout.library_dir().is_dir());
        assert!(layout.compiled_dir().is_dir());

        fs::write(layout.patches_dir().join("b.cs"), "class B {}").unwrap();
        fs::write(layout.patches_dir().join("a.cs"), "class A {}").unwrap();
        fs::write(layout.patches_dir().join("notes.md"), "").unwrap();

        let sources = layout.source_files()?;
        assert_eq!(
            sources,
            vec![layout.patches_dir().join("a.cs"), layout.patches_dir().join("b.cs")]
        );
        Ok(())
    }
}
