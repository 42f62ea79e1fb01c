use crate::config::Config;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub name: String,
    pub url: String,
    pub size: u64,
}

impl ArtifactDescriptor {
    pub fn new(name: &str, url: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            size,
        }
    }

    // An on-disk file is trusted only when its size equals the expected size;
    // anything else counts as absent and gets re-fetched.
    pub fn matches(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| meta.is_file() && meta.len() == self.size)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub weights: ArtifactDescriptor,
    pub config: ArtifactDescriptor,
}

impl ModelSpec {
    pub fn artifacts(&self) -> [&ArtifactDescriptor; 2] {
        [&self.weights, &self.config]
    }

    pub fn dir(&self, config: &Config) -> PathBuf {
        config.models_dir.join(&self.name)
    }
}

// The one pretrained model this runtime ships with.
pub fn builtin() -> ModelSpec {
    ModelSpec {
        name: "wildcat-v1".to_string(),
        weights: ArtifactDescriptor::new(
            "wildcat-v1.safetensors",
            "https://models.classy.dev/wildcat-v1/wildcat-v1.safetensors",
            2_409_608,
        ),
        config: ArtifactDescriptor::new(
            "wildcat-v1.json",
            "https://models.classy.dev/wildcat-v1/wildcat-v1.json",
            178,
        ),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledModel {
    pub name: String,
    pub model_dir: PathBuf,
    pub pulled_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Registry {
    models: HashMap<String, InstalledModel>,
}

impl Registry {
    pub fn load(config: &Config) -> Result<Self> {
        if !config.registry_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config.registry_path)?;
        let registry: Registry = toml::from_str(&content)?;
        Ok(registry)
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(&config.registry_path, content)?;
        Ok(())
    }

    pub fn add_model(&mut self, model: InstalledModel) {
        self.models.insert(model.name.clone(), model);
    }

    pub fn get_model(&self, name: &str) -> Result<&InstalledModel> {
        self.models
            .get(name)
            .ok_or_else(|| Error::ModelNotFound(name.to_string()))
    }

    pub fn list_models(&self) -> Vec<&InstalledModel> {
        self.models.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_rejects_missing_and_wrong_size() {
        let dir = tempfile::tempdir().unwrap();
        let desc = ArtifactDescriptor::new("a.bin", "http://127.0.0.1:1/a.bin", 4);

        let path = dir.path().join("a.bin");
        assert!(!desc.matches(&path));

        fs::write(&path, b"abc").unwrap();
        assert!(!desc.matches(&path));

        fs::write(&path, b"abcd").unwrap();
        assert!(desc.matches(&path));
    }

    #[test]
    fn registry_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::at(dir.path().to_path_buf())?;

        let mut registry = Registry::load(&config)?;
        assert!(registry.list_models().is_empty());

        registry.add_model(InstalledModel {
            name: "wildcat-v1".to_string(),
            model_dir: config.models_dir.join("wildcat-v1"),
            pulled_at: chrono::Utc::now().to_rfc3339(),
        });
        registry.save(&config)?;

        let reloaded = Registry::load(&config)?;
        assert_eq!(reloaded.get_model("wildcat-v1")?.name, "wildcat-v1");
        assert!(reloaded.get_model("nope").is_err());
        Ok(())
    }
}
