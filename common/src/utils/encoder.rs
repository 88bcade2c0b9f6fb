use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Which encoder produced an index's vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    #[default]
    #[serde(alias = "fast-embed")]
    FastEmbed,
    Hashed,
}

/// Turns query text into a vector comparable with an index's passage vectors.
#[derive(Clone)]
pub enum QueryEncoder {
    /// Signed feature hashing over tokens and token bigrams. Deterministic and
    /// model-free; used for small local indexes and tests.
    Hashed { dimension: usize },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
}

impl QueryEncoder {
    pub fn hashed(dimension: usize) -> Self {
        Self::Hashed {
            dimension: dimension.max(1),
        }
    }

    /// Load a FastEmbed text model by its model code, downloading weights
    /// into `cache_dir` on first use.
    pub async fn fastembed(model_code: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        let model_name = EmbeddingModel::from_str(model_code)
            .map_err(|err| anyhow!("unknown embedding model '{model_code}': {err}"))?;

        let mut options = TextInitOptions::new(model_name.clone());
        if let Some(dir) = cache_dir {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating model cache dir {}", dir.display()))?;
            options = options.with_cache_dir(dir);
        }

        let info_name = model_name.clone();
        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model = TextEmbedding::try_new(options).context("loading FastEmbed model")?;
            let dimension = EmbeddingModel::get_model_info(&info_name)
                .map(|info| info.dim)
                .ok_or_else(|| anyhow!("no metadata for FastEmbed model {info_name}"))?;
            Ok((model, dimension))
        })
        .await
        .context("joining FastEmbed loader")??;

        debug!(model = %model_name, dimension, "Query encoder ready");
        Ok(Self::FastEmbed {
            model: Arc::new(Mutex::new(model)),
            model_name,
            dimension,
        })
    }

    pub const fn kind(&self) -> EncoderKind {
        match self {
            Self::Hashed { .. } => EncoderKind::Hashed,
            Self::FastEmbed { .. } => EncoderKind::FastEmbed,
        }
    }

    pub const fn dimension(&self) -> usize {
        match self {
            Self::Hashed { dimension } | Self::FastEmbed { dimension, .. } => *dimension,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match self {
            Self::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            Self::Hashed { .. } => None,
        }
    }

    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::Hashed { dimension } => Ok(hash_features(text, *dimension)),
            Self::FastEmbed { model, .. } => {
                let mut model = model.lock().await;
                model
                    .embed(vec![text.to_owned()], None)
                    .context("encoding query with FastEmbed")?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("FastEmbed returned no vector"))
            }
        }
    }
}

fn hash_features(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    let tokens: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect();

    let bigrams = tokens
        .windows(2)
        .filter_map(|pair| match pair {
            [left, right] => Some(format!("{left} {right}")),
            _ => None,
        });
    for feature in tokens.iter().cloned().chain(bigrams) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let hash = hasher.finish();
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        let slot = usize::try_from(hash % dimension as u64).unwrap_or_default();
        if let Some(value) = vector.get_mut(slot) {
            *value += sign;
        }
    }

    let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|value| *value /= norm);
    }
    vector
}
