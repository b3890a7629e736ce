// Remotes Configuration Module
// Persistent storage for named FileLu remotes

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::providers::ProviderConfig;

/// Saved remotes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemotesConfig {
    #[serde(default)]
    pub remotes: Vec<ProviderConfig>,
}

impl RemotesConfig {
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// Insert or replace the remote with the same name.
    pub fn upsert(&mut self, remote: ProviderConfig) {
        match self.remotes.iter_mut().find(|r| r.name == remote.name) {
            Some(existing) => *existing = remote,
            None => self.remotes.push(remote),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.remotes.len();
        self.remotes.retain(|r| r.name != name);
        self.remotes.len() != before
    }
}

/// Get the path to the remotes file
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    config_dir.join("filelu-fs").join("remotes.json")
}

/// Load remotes from the default location
pub fn load_remotes() -> RemotesConfig {
    load_remotes_from(&get_config_path())
}

/// Load remotes from `path`. A missing or unreadable file yields an empty set.
pub fn load_remotes_from(path: &Path) -> RemotesConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse remotes config: {}", e);
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read remotes config: {}", e);
            }
        }
    }

    RemotesConfig::default()
}

/// Save remotes to the default location
pub fn save_remotes(config: &RemotesConfig) -> Result<(), String> {
    save_remotes_to(config, &get_config_path())
}

pub fn save_remotes_to(config: &RemotesConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(path, content)
        .map_err(|e| format!("Failed to write config: {}", e))?;

    tracing::info!("Remotes saved to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn remote(name: &str, key: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            endpoint: None,
            api_key: Some(key.to_string()),
            root: None,
            extra: HashMap::new(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("remotes.json");

        let mut config = RemotesConfig::default();
        config.upsert(remote("lu", "k1"));
        config.upsert(remote("work", "k2"));
        config.upsert(remote("lu", "k3"));
        save_remotes_to(&config, &path).unwrap();

        let loaded = load_remotes_from(&path);
        assert_eq!(loaded.remotes.len(), 2);
        assert_eq!(loaded.get("lu").unwrap().api_key.as_deref(), Some("k3"));
    }

    #[test]
    fn test_load_tolerates_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remotes.json");
        assert!(load_remotes_from(&path).remotes.is_empty());

        fs::write(&path, "{ not json").unwrap();
        assert!(load_remotes_from(&path).remotes.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut config = RemotesConfig::default();
        config.upsert(remote("lu", "k"));
        assert!(config.remove("lu"));
        assert!(!config.remove("lu"));
    }
}
