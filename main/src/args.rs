use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use common::utils::config::AppConfig;
use dataset_pipeline::FetchOptions;

#[derive(Debug, Parser)]
#[command(
    name = "colbert-server",
    version,
    about = "Run the passage search server or manage its dataset assets."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the search API server.
    Serve(ServeArgs),
    /// Download (and optionally extract) the dataset archives.
    DownloadArchives(DownloadArchivesArgs),
    /// Inspect the environment without downloading large assets.
    Doctor,
}

/// Where to fetch the dataset from. Unset values fall back to the config.
#[derive(Debug, Clone, Default, Args)]
pub struct RepoArgs {
    /// Dataset repository on the hub (owner/name)
    #[arg(long)]
    pub repo_id: Option<String>,

    /// Dataset revision: branch, tag or commit hash
    #[arg(long)]
    pub revision: Option<String>,

    /// Access token for private datasets
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

impl RepoArgs {
    pub fn fetch_options(&self, config: &AppConfig) -> FetchOptions {
        FetchOptions::new(
            self.repo_id.clone().unwrap_or_else(|| config.repo_id.clone()),
            self.revision.clone().or_else(|| config.revision.clone()),
        )
    }

    pub fn token(&self, config: &AppConfig) -> Option<String> {
        self.hf_token.clone().or_else(|| config.hf_token.clone())
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Host interface to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Query encoder model; defaults to the model recorded in the index
    #[arg(long)]
    pub checkpoint: Option<String>,

    /// Maximum number of cached search responses
    #[arg(long)]
    pub cache_size: Option<usize>,

    /// Download the collection and indexes into the hub cache before serving
    #[arg(long, conflicts_with = "download_archives")]
    pub from_cache: bool,

    /// Download dataset archives into DIR before serving
    #[arg(long, value_name = "DIR")]
    pub download_archives: Option<PathBuf>,

    /// Extraction directory for --download-archives (defaults to the download DIR)
    #[arg(long, value_name = "DIR")]
    pub extract_to: Option<PathBuf>,

    /// Extract downloaded archives when using --download-archives
    #[arg(long)]
    pub extract: bool,

    /// Folder that holds the index directories
    #[arg(long)]
    pub index_root: Option<PathBuf>,

    /// Index to serve (folder name within the index root)
    #[arg(long)]
    pub index_name: Option<String>,

    /// Passage collection file
    #[arg(long)]
    pub collection_path: Option<PathBuf>,

    #[command(flatten)]
    pub repo: RepoArgs,

    /// Hub cache directory for --from-cache downloads
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct DownloadArchivesArgs {
    /// Directory that receives the downloaded archives
    pub destination: PathBuf,

    /// Extract the archives into DIR after downloading
    #[arg(long, value_name = "DIR")]
    pub extract_to: Option<PathBuf>,

    /// Extract the archives in place (or into --extract-to)
    #[arg(long)]
    pub extract: bool,

    #[command(flatten)]
    pub repo: RepoArgs,
}
