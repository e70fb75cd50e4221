use std::path::PathBuf;

use directories::ProjectDirs;

/// Platform directories used by academia.
///
/// Every getter creates the directory if it does not exist yet and returns
/// `None` when the platform gives us nowhere to put it.
pub struct Directory {}

impl Directory {
    #[cfg(not(feature = "portable"))]
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("dev", "academia", "academia")
    }

    /// Portable builds keep everything next to the executable
    #[cfg(feature = "portable")]
    fn portable_root() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        Some(exe.parent()?.join("academia-data"))
    }

    fn ensure(dir: PathBuf) -> Option<PathBuf> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir).ok()?;
        }
        Some(dir)
    }

    /// Where `academia.toml` is looked up
    pub fn config_directory() -> Option<PathBuf> {
        #[cfg(feature = "portable")]
        let dir = Self::portable_root()?.join("config");
        #[cfg(not(feature = "portable"))]
        let dir = Self::project_dirs()?.config_dir().to_path_buf();
        Self::ensure(dir)
    }

    /// Persistent client storage lives here
    pub fn data_local_directory() -> Option<PathBuf> {
        #[cfg(feature = "portable")]
        let dir = Self::portable_root()?.join("data");
        #[cfg(not(feature = "portable"))]
        let dir = Self::project_dirs()?.data_local_dir().to_path_buf();
        Self::ensure(dir)
    }

    pub fn logs_directory() -> Option<PathBuf> {
        Self::ensure(Self::data_local_directory()?.join("logs"))
    }
}
