use std::path::{Component, Path, PathBuf};

use common::error::AppError;
use glob::Pattern;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use crate::hub::{DatasetHub, RepoFile, RepoSnapshot};

const DEFAULT_REVISION: &str = "main";

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub repo_id: String,
    pub revision: Option<String>,
}

impl FetchOptions {
    pub fn new(repo_id: impl Into<String>, revision: Option<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision,
        }
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }
}

/// Allow/ignore globs over repo-relative paths. A path is selected when it
/// matches at least one allow pattern and no ignore pattern. `*` also
/// matches `/`.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    allow: Vec<Pattern>,
    ignore: Vec<Pattern>,
}

impl FilePatterns {
    pub fn new(allow: &[&str], ignore: &[&str]) -> Result<Self, AppError> {
        Ok(Self {
            allow: compile(allow)?,
            ignore: compile(ignore)?,
        })
    }

    pub fn archives() -> Result<Self, AppError> {
        Self::new(&["archives/*"], &[])
    }

    pub fn collection_and_indexes() -> Result<Self, AppError> {
        Self::new(&["collection/*", "indexes/*"], &["archives/*"])
    }

    pub fn matches(&self, path: &str) -> bool {
        self.allow.iter().any(|pattern| pattern.matches(path))
            && !self.ignore.iter().any(|pattern| pattern.matches(path))
    }
}

fn compile(patterns: &[&str]) -> Result<Vec<Pattern>, AppError> {
    patterns
        .iter()
        .map(|raw| {
            Pattern::new(raw)
                .map_err(|err| AppError::Validation(format!("invalid file pattern '{raw}': {err}")))
        })
        .collect()
}

#[derive(Debug, Default)]
struct FetchSummary {
    downloaded: usize,
    skipped: usize,
    bytes: u64,
}

/// Download only the `archives/` folder of the dataset into `destination`.
///
/// Returns the snapshot path, i.e. the directory that contains `archives/`.
pub async fn download_archives(
    hub: &dyn DatasetHub,
    destination: &Path,
    options: &FetchOptions,
) -> Result<PathBuf, AppError> {
    fs::create_dir_all(destination).await?;
    let patterns = FilePatterns::archives()?;
    let snapshot = hub.snapshot(&options.repo_id, options.revision()).await?;

    fetch_matching(hub, &options.repo_id, &snapshot, &patterns, destination).await?;
    Ok(destination.to_path_buf())
}

/// Download the `collection/` and `indexes/` folders into the hub cache,
/// never the archives.
///
/// Files land in `cache_dir/datasets--{owner}--{name}/snapshots/{commit}`,
/// which is returned.
pub async fn download_collection_and_indexes(
    hub: &dyn DatasetHub,
    cache_dir: &Path,
    options: &FetchOptions,
) -> Result<PathBuf, AppError> {
    let patterns = FilePatterns::collection_and_indexes()?;
    let snapshot = hub.snapshot(&options.repo_id, options.revision()).await?;

    let repo_dir = cache_dir.join(repo_folder_name(&options.repo_id));
    let snapshot_dir = repo_dir.join("snapshots").join(&snapshot.commit);
    fs::create_dir_all(&snapshot_dir).await?;
    record_ref(&repo_dir, options.revision(), &snapshot.commit).await?;

    fetch_matching(hub, &options.repo_id, &snapshot, &patterns, &snapshot_dir).await?;
    Ok(snapshot_dir)
}

fn repo_folder_name(repo_id: &str) -> String {
    format!("datasets--{}", repo_id.replace('/', "--"))
}

async fn record_ref(repo_dir: &Path, revision: &str, commit: &str) -> Result<(), AppError> {
    if revision == commit {
        return Ok(());
    }
    let Some(relative) = safe_relative_path(revision) else {
        debug!(revision, "revision is not usable as a ref path");
        return Ok(());
    };
    let ref_path = repo_dir.join("refs").join(relative);
    if let Some(parent) = ref_path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(&ref_path, commit).await?;
    Ok(())
}

#[instrument(skip_all, fields(repo_id = %repo_id, commit = %snapshot.commit, target = %target.display()))]
async fn fetch_matching(
    hub: &dyn DatasetHub,
    repo_id: &str,
    snapshot: &RepoSnapshot,
    patterns: &FilePatterns,
    target: &Path,
) -> Result<FetchSummary, AppError> {
    let mut summary = FetchSummary::default();

    for file in snapshot.files.iter().filter(|file| patterns.matches(&file.path)) {
        let Some(relative) = safe_relative_path(&file.path) else {
            warn!(path = %file.path, "Skipping repository file with an unsafe path");
            continue;
        };
        let destination = target.join(relative);

        if is_complete(&destination, file).await {
            debug!(path = %file.path, "Already downloaded, skipping");
            summary.skipped = summary.skipped.saturating_add(1);
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        info!(path = %file.path, size = ?file.size, "Downloading dataset file");
        let bytes = hub
            .download(repo_id, &snapshot.commit, file, &destination)
            .await?;
        summary.downloaded = summary.downloaded.saturating_add(1);
        summary.bytes = summary.bytes.saturating_add(bytes);
    }

    if summary.downloaded == 0 && summary.skipped == 0 {
        warn!("No repository files matched the requested patterns");
    }
    info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped,
        bytes = summary.bytes,
        "Dataset fetch finished"
    );

    Ok(summary)
}

async fn is_complete(destination: &Path, file: &RepoFile) -> bool {
    match fs::metadata(destination).await {
        Ok(meta) if meta.is_file() => file.size.map_or(true, |size| meta.len() == size),
        _ => false,
    }
}

/// Converts a repo-relative path into a local relative path, refusing
/// anything that could escape the target directory.
fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    if path.is_empty()
        || !candidate
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(candidate.to_path_buf())
}
