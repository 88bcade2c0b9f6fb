use std::path::{Path, PathBuf};

use common::{error::AppError, utils::config::AppConfig};
use dataset_pipeline::{
    detect_dataset_paths, download_archives, download_collection_and_indexes, extract_archives,
    DatasetHub, FetchOptions,
};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::args::{DownloadArchivesArgs, ServeArgs};

/// Index and collection chosen for serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServePlan {
    pub index_root: PathBuf,
    pub index_name: String,
    pub collection_path: Option<PathBuf>,
}

/// Resolve what to serve, downloading and extracting first when asked to.
///
/// Returns `None` when archives were downloaded without extraction; the
/// operator is expected to extract them and relaunch.
pub async fn prepare_serve(
    args: &ServeArgs,
    config: &AppConfig,
    hub: &dyn DatasetHub,
) -> Result<Option<ServePlan>, AppError> {
    let options = args.repo.fetch_options(config);

    let mut plan = if args.from_cache {
        let cache_dir = args
            .cache_dir
            .clone()
            .unwrap_or_else(|| config.hub_cache_dir());
        let snapshot = download_collection_and_indexes(hub, &cache_dir, &options).await?;
        println!("Downloaded dataset snapshot to {}", snapshot.display());
        resolve_plan(&snapshot, args.index_name.as_deref())?
    } else if let Some(destination) = &args.download_archives {
        let snapshot = download_archives(hub, destination, &options).await?;
        println!(
            "Archives downloaded to {}",
            snapshot.join(dataset_pipeline::ARCHIVES_DIRNAME).display()
        );

        if !args.extract && args.extract_to.is_none() {
            println!(
                "Archives downloaded. Extract them manually and relaunch the server with --index-root/--index-name."
            );
            return Ok(None);
        }

        let target = args.extract_to.clone().unwrap_or_else(|| destination.clone());
        let extracted = extract_blocking(snapshot, target).await?;
        println!("Archives extracted to {}", extracted.display());
        resolve_plan(&extracted, args.index_name.as_deref())?
    } else {
        let (Some(index_root), Some(index_name)) = (&args.index_root, &args.index_name) else {
            return Err(AppError::layout(
                "--index-root and --index-name are required when not downloading the dataset.",
            ));
        };
        ServePlan {
            index_root: index_root.clone(),
            index_name: index_name.clone(),
            collection_path: None,
        }
    };

    if let Some(explicit) = &args.collection_path {
        plan.collection_path = Some(explicit.clone());
    }
    if plan.collection_path.is_none() {
        warn!("Collection path could not be inferred; results will carry no passage text");
    }

    Ok(Some(plan))
}

fn resolve_plan(base: &Path, preferred_index: Option<&str>) -> Result<ServePlan, AppError> {
    let resolved = detect_dataset_paths(base, preferred_index)?;
    Ok(ServePlan {
        index_root: resolved.index_root,
        index_name: resolved.index_name,
        collection_path: resolved.collection_path,
    })
}

async fn extract_blocking(snapshot: PathBuf, target: PathBuf) -> Result<PathBuf, AppError> {
    tokio::task::spawn_blocking(move || extract_archives(&snapshot, &target)).await?
}

pub async fn download_archives_command(
    args: &DownloadArchivesArgs,
    config: &AppConfig,
    hub: &dyn DatasetHub,
) -> Result<PathBuf, AppError> {
    let options: FetchOptions = args.repo.fetch_options(config);
    let snapshot = download_archives(hub, &args.destination, &options).await?;
    println!(
        "Archives downloaded to {}",
        snapshot.join(dataset_pipeline::ARCHIVES_DIRNAME).display()
    );

    if args.extract || args.extract_to.is_some() {
        let target = args
            .extract_to
            .clone()
            .unwrap_or_else(|| args.destination.clone());
        let extracted = extract_blocking(snapshot.clone(), target).await?;
        println!("Archives extracted to {}", extracted.display());
    }

    Ok(snapshot)
}

#[derive(Debug, PartialEq, Eq)]
struct Check {
    ok: bool,
    message: String,
}

/// Print environment diagnostics. Returns whether every check passed.
pub fn doctor(config: &AppConfig) -> bool {
    println!("colbert-server {}", env!("CARGO_PKG_VERSION"));
    println!("Dataset repository: {}", config.repo_id);
    println!("Hub endpoint: {}", config.hf_endpoint);
    println!(
        "Listening address: {}:{} (cache size {})",
        config.http_host, config.http_port, config.cache_size
    );
    println!("{}", describe_cache(&config.hub_cache_dir()));

    let checks = [
        check_cache_size(config.cache_size),
        check_writable_parent(&config.hub_cache_dir(), "Hub cache"),
        check_writable_parent(&config.fastembed_cache_dir(), "Embedding model cache"),
    ];

    let mut healthy = true;
    for check in &checks {
        let status = if check.ok { "OK" } else { "WARN" };
        println!("[{status}] {}", check.message);
        healthy &= check.ok;
    }

    if healthy {
        println!(
            "Environment looks ready. Run `colbert-server serve --from-cache` to download the indexes."
        );
    } else {
        println!("Some checks failed. Review the warnings above before running `serve`.");
    }
    info!(healthy, "Doctor finished");
    healthy
}

fn describe_cache(cache_dir: &Path) -> String {
    if !cache_dir.exists() {
        return format!(
            "Hub cache: {} (directory missing, will be created)",
            cache_dir.display()
        );
    }
    let bytes: u64 = WalkDir::new(cache_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(std::fs::Metadata::is_file)
        .map(|meta| meta.len())
        .sum();
    format!(
        "Hub cache: {} (~{:.1} MB)",
        cache_dir.display(),
        bytes as f64 / (1024.0 * 1024.0)
    )
}

fn check_cache_size(cache_size: usize) -> Check {
    if cache_size == 0 {
        Check {
            ok: false,
            message: "cache size: must be at least 1".to_string(),
        }
    } else {
        Check {
            ok: true,
            message: format!("cache size: {cache_size} entries"),
        }
    }
}

/// A directory is usable when it exists as a directory, or when its nearest
/// existing ancestor is a directory it can be created in.
fn check_writable_parent(dir: &Path, label: &str) -> Check {
    let existing = dir.ancestors().find(|candidate| candidate.exists());
    match existing {
        Some(found) if found.is_dir() => {
            let readonly = std::fs::metadata(found)
                .map(|meta| meta.permissions().readonly())
                .unwrap_or(true);
            Check {
                ok: !readonly,
                message: if readonly {
                    format!("{label}: {} is not writable", found.display())
                } else if found == dir {
                    format!("{label}: {}", dir.display())
                } else {
                    format!("{label}: {} (will be created)", dir.display())
                },
            }
        }
        Some(found) => Check {
            ok: false,
            message: format!("{label}: {} is not a directory", found.display()),
        },
        None => Check {
            ok: true,
            message: format!("{label}: {} (will be created)", dir.display()),
        },
    }
}
