use std::path::{Path, PathBuf};

/// Manages the `.warden/` control directory layout.
///
/// Everything the watchdog reads or writes lives under a single data directory
/// inside the working root. This struct provides accessors for each well-known
/// path and handles initialization.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create a new DataDir referencing the given directory (e.g. `<root>/.warden`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the data directory for a working root. Absolute `data_dir`
    /// values are used as-is; relative ones are joined onto the root.
    pub fn for_root(working_root: &Path, data_dir: &Path) -> Self {
        if data_dir.is_absolute() {
            Self::new(data_dir)
        } else {
            Self::new(working_root.join(data_dir))
        }
    }

    /// The data directory itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the session registry.
    pub fn sessions(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    /// Path to the advisory lock held for the duration of a tick.
    pub fn lock(&self) -> PathBuf {
        self.root.join("lock")
    }

    /// Path to the daemon status file.
    pub fn status(&self) -> PathBuf {
        self.root.join("status")
    }

    /// Path to the config file (e.g. `.warden/config.toml`).
    pub fn config(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Create the data directory if missing.
    /// Returns Ok(true) if it was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        Ok(created)
    }
}
