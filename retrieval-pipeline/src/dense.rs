use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use common::{
    error::AppError,
    utils::encoder::{EncoderKind, QueryEncoder},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    backend::{BackendHit, BackendInfo, RetrievalBackend},
    collection::Collection,
    scoring::dot,
};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.f32";

/// `manifest.json` inside an index bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub model: String,
    pub dimension: usize,
    pub passages: usize,
    #[serde(default)]
    pub encoder: EncoderKind,
}

#[derive(Debug, Clone, Default)]
pub struct DenseIndexOptions {
    /// Query encoder to use instead of the one named in the manifest.
    pub checkpoint: Option<String>,
    pub embedding_cache_dir: Option<PathBuf>,
}

/// Flat dense index: one precomputed vector per passage, scored against the
/// embedded query by dot product. Row `i` of the matrix is passage id `i`.
pub struct DenseIndex {
    index_name: String,
    dimension: usize,
    embeddings: Arc<[f32]>,
    encoder: QueryEncoder,
    collection: Collection,
}

impl DenseIndex {
    pub async fn open(
        index_root: &Path,
        index_name: &str,
        collection_path: Option<&Path>,
        options: DenseIndexOptions,
    ) -> Result<Self, AppError> {
        let bundle = index_root.join(index_name);
        if !bundle.is_dir() {
            return Err(AppError::Validation(format!(
                "index bundle {} does not exist",
                bundle.display()
            )));
        }

        let manifest_path = bundle.join(MANIFEST_FILE);
        let raw = tokio::fs::read_to_string(&manifest_path).await.map_err(|err| {
            AppError::Validation(format!("cannot read {}: {err}", manifest_path.display()))
        })?;
        let manifest: IndexManifest = serde_json::from_str(&raw).map_err(|err| {
            AppError::Validation(format!("invalid {}: {err}", manifest_path.display()))
        })?;
        if manifest.dimension == 0 {
            return Err(AppError::Validation(format!(
                "{} declares a zero dimension",
                manifest_path.display()
            )));
        }

        let encoder = build_encoder(&manifest, options).await?;
        if encoder.dimension() != manifest.dimension {
            return Err(AppError::Validation(format!(
                "query encoder produces {}-dimensional vectors but index {index_name} stores {}",
                encoder.dimension(),
                manifest.dimension
            )));
        }

        let embeddings_path = bundle.join(EMBEDDINGS_FILE);
        let collection_path = collection_path.map(Path::to_path_buf);
        let (embeddings, collection) = tokio::task::spawn_blocking(move || {
            let embeddings = read_embeddings(&embeddings_path, &manifest)?;
            let collection = match collection_path {
                Some(path) => Collection::load(&path)?,
                None => Collection::empty(),
            };
            Ok::<_, AppError>((embeddings, collection))
        })
        .await??;

        let index = Self::from_parts(index_name, embeddings, encoder, collection)?;
        info!(
            index = index_name,
            passages = index.passages(),
            dimension = index.dimension,
            encoder = ?index.encoder.kind(),
            model = index.encoder.model_code().as_deref().unwrap_or("-"),
            "Opened dense index"
        );
        Ok(index)
    }

    pub fn from_parts(
        index_name: &str,
        embeddings: Vec<f32>,
        encoder: QueryEncoder,
        collection: Collection,
    ) -> Result<Self, AppError> {
        let dimension = encoder.dimension();
        if dimension == 0 || embeddings.len() % dimension != 0 {
            return Err(AppError::Validation(format!(
                "embedding matrix of {} values is not a multiple of dimension {dimension}",
                embeddings.len()
            )));
        }
        Ok(Self {
            index_name: index_name.to_string(),
            dimension,
            embeddings: embeddings.into(),
            encoder,
            collection,
        })
    }

    pub fn passages(&self) -> usize {
        self.embeddings.len() / self.dimension
    }
}

async fn build_encoder(
    manifest: &IndexManifest,
    options: DenseIndexOptions,
) -> Result<QueryEncoder, AppError> {
    match manifest.encoder {
        EncoderKind::Hashed => Ok(QueryEncoder::hashed(manifest.dimension)),
        EncoderKind::FastEmbed => {
            if let Some(checkpoint) = options.checkpoint.as_deref() {
                if checkpoint != manifest.model {
                    warn!(
                        checkpoint,
                        manifest_model = %manifest.model,
                        "Requested checkpoint differs from the model the index was built with"
                    );
                }
            }
            let model = options.checkpoint.unwrap_or_else(|| manifest.model.clone());
            Ok(QueryEncoder::fastembed(&model, options.embedding_cache_dir).await?)
        }
    }
}

fn read_embeddings(path: &Path, manifest: &IndexManifest) -> Result<Vec<f32>, AppError> {
    let bytes = std::fs::read(path)
        .map_err(|err| AppError::Validation(format!("cannot read {}: {err}", path.display())))?;
    let expected = manifest
        .passages
        .checked_mul(manifest.dimension)
        .and_then(|values| values.checked_mul(4))
        .ok_or_else(|| AppError::Validation("index manifest sizes overflow".into()))?;
    if bytes.len() != expected {
        return Err(AppError::Validation(format!(
            "{} holds {} bytes, expected {expected} for {} passages of dimension {}",
            path.display(),
            bytes.len(),
            manifest.passages,
            manifest.dimension
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| chunk.try_into().map(f32::from_le_bytes).unwrap_or_default())
        .collect())
}

fn by_score_then_pid(a: &BackendHit, b: &BackendHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.pid.cmp(&b.pid))
}

fn top_hits(embeddings: &[f32], dimension: usize, query: &[f32], limit: usize) -> Vec<BackendHit> {
    if limit == 0 {
        return Vec::new();
    }
    let mut hits: Vec<BackendHit> = embeddings
        .chunks_exact(dimension)
        .enumerate()
        .map(|(pid, row)| BackendHit {
            pid: pid as u64,
            rank: 0,
            score: dot(row, query),
        })
        .collect();

    if hits.len() > limit {
        hits.select_nth_unstable_by(limit - 1, by_score_then_pid);
        hits.truncate(limit);
    }
    hits.sort_by(by_score_then_pid);
    for (position, hit) in hits.iter_mut().enumerate() {
        hit.rank = position + 1;
    }
    hits
}

#[async_trait]
impl RetrievalBackend for DenseIndex {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<BackendHit>, AppError> {
        let vector = self.encoder.encode(query).await?;
        if vector.len() != self.dimension {
            return Err(AppError::InternalError(format!(
                "query embedding has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }

        let embeddings = Arc::clone(&self.embeddings);
        let dimension = self.dimension;
        let hits = tokio::task::spawn_blocking(move || {
            top_hits(&embeddings, dimension, &vector, max_results)
        })
        .await?;
        Ok(hits)
    }

    fn lookup_text(&self, pid: u64) -> Option<String> {
        self.collection.get(pid).map(str::to_owned)
    }

    fn describe(&self) -> BackendInfo {
        BackendInfo {
            index_name: self.index_name.clone(),
            passages: self.passages(),
            collection_loaded: !self.collection.is_empty(),
        }
    }
}
