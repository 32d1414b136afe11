use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use conduit_core::domain::agent::AgentDefinition;

use crate::registry::RegistryError;

/// Named agent definitions stored as `<dir>/<name>.json`.
#[derive(Clone, Debug)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub async fn load(&self, name: &str) -> Result<AgentDefinition, RegistryError> {
        let path = self.path_for(name);
        if !is_plain_name(name) {
            return Err(RegistryError::TemplateNotFound { name: name.to_string(), path });
        }

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::TemplateNotFound { name: name.to_string(), path });
            }
            Err(error) => {
                return Err(RegistryError::Template(format!("{}: {error}", path.display())));
            }
        };

        serde_json::from_str(&raw)
            .map_err(|error| RegistryError::Template(format!("{}: {error}", path.display())))
    }

    /// Template names available on disk, sorted.
    pub async fn names(&self) -> Vec<String> {
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return Vec::new();
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.chars().any(|ch| matches!(ch, '/' | '\\') || ch.is_control())
}
