use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use multiworld_core::WorldSpec;

use crate::{
    error::{Result, SupervisorError},
    port_alloc::{self, PortPair},
};

/// World keys double as directory names, so keep them filesystem-safe.
pub fn validate_world_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= 64
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(SupervisorError::InvalidWorldKey(key.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorldsDocument {
    #[serde(default)]
    pub worlds: BTreeMap<String, WorldSpec>,
}

/// The declarative world list. Each operation works on the in-memory document;
/// callers persist with [`WorldStore::save`].
#[derive(Debug, Clone, Default)]
pub struct WorldStore {
    path: Option<PathBuf>,
    doc: WorldsDocument,
}

impl WorldStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the document at `path`; a missing file is an empty document.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let doc = match tokio::fs::read_to_string(path).await {
            Ok(text) if text.trim().is_empty() => WorldsDocument::default(),
            Ok(text) => serde_yaml::from_str(&text)
                .with_context(|| format!("parse world config {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => WorldsDocument::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("read world config {}", path.display()));
            }
        };
        for (key, spec) in &doc.worlds {
            if validate_world_key(key).is_err() {
                tracing::warn!(world = %key, "world key is not filesystem-safe; it cannot be started");
            }
            if spec.level_name.trim().is_empty() {
                tracing::debug!(world = %key, "no level-name; the world key is used");
            }
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            doc,
        })
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("create config dir")?;
        }
        let data = serde_yaml::to_string(&self.doc).context("serialize world config")?;
        let tmp = path.with_extension("yml.tmp");
        tokio::fs::write(&tmp, data.as_bytes())
            .await
            .context("write world config tmp")?;
        tokio::fs::rename(&tmp, path)
            .await
            .context("persist world config")?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&WorldSpec> {
        self.doc.worlds.get(key)
    }

    pub fn snapshot(&self) -> Vec<(String, WorldSpec)> {
        self.doc
            .worlds
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn insert(&mut self, key: &str, spec: WorldSpec) {
        self.doc.worlds.insert(key.to_string(), spec);
    }

    /// Port pairs of every configured world. A missing secondary is assumed to
    /// sit right above the primary.
    pub fn claimed_ports(&self) -> Vec<PortPair> {
        self.doc
            .worlds
            .values()
            .filter_map(|s| {
                let primary = s.primary_port?;
                Some(PortPair {
                    primary,
                    secondary: s
                        .secondary_port
                        .unwrap_or_else(|| primary.saturating_add(1)),
                })
            })
            .collect()
    }

    /// Add a new enabled world named after its key. Name and port conflicts
    /// are rejected without touching the document.
    pub fn create(
        &mut self,
        key: &str,
        requested_port: u16,
        primary_world: &str,
        primary_ports: PortPair,
    ) -> Result<&WorldSpec> {
        validate_world_key(key)?;
        if key == primary_world || self.doc.worlds.contains_key(key) {
            return Err(SupervisorError::WorldExists(key.to_string()));
        }
        if let Some((existing, _)) = self
            .doc
            .worlds
            .iter()
            .find(|(k, s)| s.level_name_or(k) == key)
        {
            return Err(SupervisorError::NameConflict {
                name: key.to_string(),
                existing: existing.clone(),
            });
        }

        let pair = port_alloc::allocate(requested_port, primary_ports, &self.claimed_ports())?;
        let spec = WorldSpec::new(key, pair.primary, pair.secondary);
        Ok(self.doc.worlds.entry(key.to_string()).or_insert(spec))
    }

    pub fn remove(&mut self, key: &str) -> Result<WorldSpec> {
        self.doc
            .worlds
            .remove(key)
            .ok_or_else(|| SupervisorError::UnknownWorld(key.to_string()))
    }

    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> Result<WorldSpec> {
        let spec = self
            .doc
            .worlds
            .get_mut(key)
            .ok_or_else(|| SupervisorError::UnknownWorld(key.to_string()))?;
        spec.enabled = enabled;
        Ok(spec.clone())
    }
}
