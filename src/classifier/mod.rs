use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{self, ModelSpec};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{Linear, Module, VarBuilder};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    pub labels: Vec<String>,
    pub image_size: usize,
}

pub struct Classifier {
    labels: Vec<String>,
    image_size: usize,
    head: Linear,
    device: Device,
}

impl Classifier {
    pub fn load(weights_path: &Path, config_path: &Path, device: &Device) -> Result<Self> {
        tracing::info!("Loading model from: {:?}", weights_path);

        let config_content = std::fs::read_to_string(config_path)
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to read config: {}", e)))?;

        let config: ClassifierConfig = serde_json::from_str(&config_content)
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to parse config: {}", e)))?;

        if config.labels.is_empty() {
            return Err(Error::ModelLoadFailed(
                "Model config declares no class labels".to_string(),
            ));
        }
        if config.image_size == 0 {
            return Err(Error::ModelLoadFailed(
                "Model config declares a zero image size".to_string(),
            ));
        }

        let in_dim = 3 * config.image_size * config.image_size;
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)
                .map_err(|e| Error::ModelLoadFailed(format!("Failed to load weights: {}", e)))?
        };

        let head = candle_nn::linear(in_dim, config.labels.len(), vb.pp("classifier"))
            .map_err(|e| Error::ModelLoadFailed(format!("Failed to build head: {}", e)))?;

        tracing::info!("Model loaded successfully");
        tracing::info!("  Classes: {}", config.labels.len());
        tracing::info!("  Input: {0}x{0} RGB", config.image_size);

        Ok(Self {
            labels: config.labels,
            image_size: config.image_size,
            head,
            device: device.clone(),
        })
    }

    /// Decodes PNG/JPEG bytes and returns per-class probabilities aligned
    /// with `labels()`.
    pub fn predict(&self, image_bytes: &[u8]) -> Result<Vec<f32>> {
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| Error::InvalidInput(format!("Could not decode image: {}", e)))?;

        let size = self.image_size as u32;
        let rgb = img
            .resize_exact(size, size, image::imageops::FilterType::Triangle)
            .to_rgb8();
        let pixels: Vec<f32> = rgb.into_raw().into_iter().map(|p| p as f32 / 255.0).collect();

        let input = Tensor::from_vec(pixels, (1, 3 * self.image_size * self.image_size), &self.device)
            .map_err(|e| Error::ClassificationError(format!("Failed to build input tensor: {}", e)))?;

        let logits = self
            .head
            .forward(&input)
            .map_err(|e| Error::ClassificationError(format!("Forward pass failed: {}", e)))?;

        let probs = softmax(&logits, D::Minus1)
            .and_then(|t| t.squeeze(0))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::ClassificationError(format!("Softmax failed: {}", e)))?;

        Ok(probs)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.labels.len()
    }
}

/// Fetches the backing artifacts and deserializes them at most once per
/// process; every call yields the same classifier instance.
pub struct ModelCache {
    config: Config,
    device: Device,
    spec: ModelSpec,
    cell: OnceCell<Arc<Classifier>>,
}

impl ModelCache {
    pub fn new(config: Config, device: Device, spec: ModelSpec) -> Self {
        Self {
            config,
            device,
            spec,
            cell: OnceCell::new(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.spec.name
    }

    pub fn loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    pub async fn get(&self) -> Result<Arc<Classifier>> {
        self.cell
            .get_or_try_init(|| async {
                let dir = self.spec.dir(&self.config);
                let weights =
                    model::ensure_artifact(&dir.join(&self.spec.weights.name), &self.spec.weights)
                        .await?;
                let config_path =
                    model::ensure_artifact(&dir.join(&self.spec.config.name), &self.spec.config)
                        .await?;

                tracing::info!("Loading model '{}'", self.spec.name);
                let classifier = Classifier::load(&weights, &config_path, &self.device)?;
                Ok(Arc::new(classifier))
            })
            .await
            .map(Arc::clone)
    }
}
