use std::env;
use std::path::PathBuf;

/// Workspace paths for the local SkillMeat installation.
///
/// The home directory defaults to `~/.skillmeat` and can be overridden with
/// the `SKILLMEAT_HOME` environment variable (tests point it at a temp dir).
#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    home: PathBuf,
}

impl WorkspaceConfig {
    pub fn from_env() -> Self {
        let home = env::var_os("SKILLMEAT_HOME")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".skillmeat")))
            .unwrap_or_else(|| PathBuf::from(".skillmeat"));
        Self { home }
    }

    pub fn with_home(home: PathBuf) -> Self {
        Self { home }
    }

    pub fn home(&self) -> &PathBuf {
        &self.home
    }

    /// Root directory holding all collection directories.
    pub fn collections_root(&self) -> PathBuf {
        self.home.join("collections")
    }

    /// Directory of a single named collection.
    pub fn collection_path(&self, name: &str) -> PathBuf {
        self.collections_root().join(name)
    }

    /// Default on-disk cache database location.
    pub fn db_path(&self) -> PathBuf {
        self.home.join(db::DEFAULT_DB_FILENAME)
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
