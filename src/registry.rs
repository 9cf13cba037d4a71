/// Session registry: a JSON array of [`AgentSession`] records on disk.
///
/// A missing file, or one that is not a JSON array, reads as an empty registry.
/// Each element is parsed on its own; elements that are not records we
/// understand (an upstream state we do not know, a malformed field) are carried
/// through saves untouched. Writes go to a temporary file in the same directory
/// and are renamed over the target, so readers never see a partial write.
use crate::session::AgentSession;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One element of the registry array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegistryEntry {
    Session(AgentSession),
    /// Not interpreted by the watchdog; written back exactly as read.
    Unrecognized(serde_json::Value),
}

impl RegistryEntry {
    fn parse(value: serde_json::Value) -> Self {
        match AgentSession::deserialize(&value) {
            Ok(mut session) => {
                session.normalize();
                RegistryEntry::Session(session)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    id = value.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                    "unrecognized registry record, leaving it untouched"
                );
                RegistryEntry::Unrecognized(value)
            }
        }
    }

    pub fn as_session(&self) -> Option<&AgentSession> {
        match self {
            RegistryEntry::Session(session) => Some(session),
            RegistryEntry::Unrecognized(_) => None,
        }
    }
}

/// Loads and persists the session registry at a fixed path.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the records the watchdog understands, normalizing legacy ones.
    pub fn load(&self) -> Result<Vec<AgentSession>, RegistryError> {
        Ok(self
            .load_entries()?
            .into_iter()
            .filter_map(|entry| match entry {
                RegistryEntry::Session(session) => Some(session),
                RegistryEntry::Unrecognized(_) => None,
            })
            .collect())
    }

    /// Load every element in order, including ones the watchdog does not
    /// understand.
    pub fn load_entries(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RegistryError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let values: Vec<serde_json::Value> = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "session registry is not a valid record list, treating as empty"
                );
                return Ok(Vec::new());
            }
        };

        Ok(values.into_iter().map(RegistryEntry::parse).collect())
    }

    /// Atomically replace the registry with `records`, pretty-printed and
    /// newline-terminated.
    pub fn save<T: Serialize>(&self, records: &[T]) -> Result<(), RegistryError> {
        let mut json = serde_json::to_string_pretty(records)
            .map_err(|e| RegistryError::Serialize { source: e })?;
        json.push('\n');

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RegistryError::Write {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let tmp_path = tmp.path().to_path_buf();
        tmp.write_all(json.as_bytes())
            .map_err(|e| RegistryError::Write {
                path: tmp_path,
                source: e,
            })?;
        tmp.persist(&self.path).map_err(|e| RegistryError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;

        tracing::debug!(
            path = %self.path.display(),
            records = records.len(),
            "session registry persisted"
        );
        Ok(())
    }
}

/// Errors from registry operations.
#[derive(Debug)]
pub enum RegistryError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Read { path, source } => {
                write!(f, "failed to read session registry {}: {source}", path.display())
            }
            RegistryError::Serialize { source } => {
                write!(f, "failed to serialize session registry: {source}")
            }
            RegistryError::Write { path, source } => {
                write!(f, "failed to write temp registry file {}: {source}", path.display())
            }
            RegistryError::Persist { path, source } => {
                write!(f, "failed to replace session registry {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::Read { source, .. } => Some(source),
            RegistryError::Serialize { source } => Some(source),
            RegistryError::Write { source, .. } => Some(source),
            RegistryError::Persist { source, .. } => Some(source),
        }
    }
}
