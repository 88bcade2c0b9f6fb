//! Acquisition and resolution of the on-disk dataset that backs the search
//! server: fetch files from the remote dataset repository, unpack archives,
//! and work out which index and collection to hand to the retrieval backend.

pub mod extract;
pub mod fetch;
pub mod hub;
pub mod layout;

pub use extract::{extract_archives, is_supported_archive, SUPPORTED_ARCHIVE_SUFFIXES};
pub use fetch::{download_archives, download_collection_and_indexes, FetchOptions, FilePatterns};
pub use hub::{DatasetHub, HfHubClient, RepoFile, RepoSnapshot};
pub use layout::{
    detect_dataset_paths, infer_collection_path, locate_dataset_root, select_index,
    ResolvedDatasetPaths,
};

pub const ARCHIVES_DIRNAME: &str = "archives";
pub const COLLECTION_DIRNAME: &str = "collection";
pub const INDEXES_DIRNAME: &str = "indexes";
