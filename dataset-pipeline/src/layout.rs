use std::{
    collections::{HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use common::error::AppError;
use tracing::debug;

use crate::{COLLECTION_DIRNAME, INDEXES_DIRNAME};

/// Everything the retrieval backend needs to open a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDatasetPaths {
    pub index_root: PathBuf,
    pub index_name: String,
    pub collection_path: Option<PathBuf>,
}

/// Breadth-first search below `root` for the shallowest directory that has
/// an `indexes/` child. Siblings are visited in name order.
pub fn locate_dataset_root(root: &Path) -> Result<PathBuf, AppError> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    let mut visited = HashSet::new();

    while let Some(current) = queue.pop_front() {
        let key = fs::canonicalize(&current).unwrap_or_else(|_| current.clone());
        if !visited.insert(key) {
            continue;
        }

        if current.join(INDEXES_DIRNAME).is_dir() {
            debug!(dataset_root = %current.display(), "Located dataset root");
            return Ok(current);
        }

        let Ok(entries) = fs::read_dir(&current) else {
            continue;
        };
        let mut children: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        children.sort();
        queue.extend(children);
    }

    Err(AppError::layout(format!(
        "Could not find an '{INDEXES_DIRNAME}' folder beneath {}. Verify the download or pass --index-root and --index-name explicitly.",
        root.display()
    )))
}

/// Pick the index directory to serve from `dataset_root/indexes`.
pub fn select_index(dataset_root: &Path, preferred: Option<&str>) -> Result<String, AppError> {
    let indexes_root = dataset_root.join(INDEXES_DIRNAME);
    if !indexes_root.is_dir() {
        return Err(AppError::layout(format!(
            "Dataset root {} has no '{INDEXES_DIRNAME}' directory.",
            dataset_root.display()
        )));
    }

    if let Some(name) = preferred.filter(|name| !name.is_empty()) {
        if !indexes_root.join(name).exists() {
            return Err(AppError::layout(format!(
                "Index '{name}' was not found under {}.",
                indexes_root.display()
            )));
        }
        return Ok(name.to_string());
    }

    let mut candidates: Vec<String> = fs::read_dir(&indexes_root)?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    candidates.sort();

    match candidates.as_slice() {
        [] => Err(AppError::layout(format!(
            "No index directories were found under {}.",
            indexes_root.display()
        ))),
        [only] => Ok(only.clone()),
        many => Err(AppError::layout(format!(
            "Multiple index directories detected. Please supply --index-name. Available options: {}",
            many.join(", ")
        ))),
    }
}

/// Find the passage collection for a dataset root.
///
/// Order: a `collection` file; the single `.tsv` inside a `collection/`
/// directory (or the directory itself when it holds none); a single
/// `collection*.tsv` next to `indexes/`. Two or more TSVs inside
/// `collection/` is ambiguous and an error.
pub fn infer_collection_path(dataset_root: &Path) -> Result<Option<PathBuf>, AppError> {
    let collection = dataset_root.join(COLLECTION_DIRNAME);
    if collection.is_file() {
        return Ok(Some(collection));
    }

    if collection.is_dir() {
        let tsv_files = sorted_files(&collection, |name| name.ends_with(".tsv"))?;
        return match tsv_files.as_slice() {
            [] => Ok(Some(collection)),
            [only] => Ok(Some(only.clone())),
            many => {
                let names: Vec<String> = many
                    .iter()
                    .filter_map(|path| path.file_name())
                    .map(|name| name.to_string_lossy().into_owned())
                    .collect();
                Err(AppError::layout(format!(
                    "Multiple TSV files found in {}: {}. Pass --collection-path explicitly.",
                    collection.display(),
                    names.join(", ")
                )))
            }
        };
    }

    let mut root_candidates = sorted_files(dataset_root, |name| {
        name.starts_with(COLLECTION_DIRNAME) && name.ends_with(".tsv")
    })?;
    if root_candidates.len() == 1 {
        return Ok(root_candidates.pop());
    }

    Ok(None)
}

/// Locate, select and infer in one pass over a downloaded or extracted tree.
pub fn detect_dataset_paths(
    base: &Path,
    preferred_index: Option<&str>,
) -> Result<ResolvedDatasetPaths, AppError> {
    let dataset_root = locate_dataset_root(base)?;
    let index_name = select_index(&dataset_root, preferred_index)?;
    let collection_path = infer_collection_path(&dataset_root)?;

    Ok(ResolvedDatasetPaths {
        index_root: dataset_root.join(INDEXES_DIRNAME),
        index_name,
        collection_path,
    })
}

fn sorted_files(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<PathBuf>, AppError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| keep(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn mkdir(path: &Path) {
        fs::create_dir_all(path).expect("mkdir");
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            mkdir(parent);
        }
        fs::write(path, "0\tpassage\n").expect("write");
    }

    fn layout_message(err: AppError) -> String {
        match err {
            AppError::DatasetLayout(message) => message,
            other => panic!("expected layout error, got {other:?}"),
        }
    }

    #[test]
    fn resolves_nested_wrapper_directory() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("extracted");
        mkdir(&root.join("wrapper/indexes/wiki17.nbits.local"));
        touch(&root.join("wrapper/collection/wiki.abstracts.2017.tsv"));

        let resolved = detect_dataset_paths(&root, None).expect("resolve");

        assert_eq!(resolved.index_root, root.join("wrapper/indexes"));
        assert_eq!(resolved.index_name, "wiki17.nbits.local");
        assert_eq!(
            resolved.collection_path,
            Some(root.join("wrapper/collection/wiki.abstracts.2017.tsv"))
        );
    }

    #[test]
    fn shallowest_indexes_directory_wins() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("a/indexes/x"));
        mkdir(&dir.path().join("b/c/indexes/y"));

        assert_eq!(
            locate_dataset_root(dir.path()).expect("locate"),
            dir.path().join("a")
        );
    }

    #[test]
    fn siblings_are_searched_in_name_order() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("zeta/indexes/z"));
        mkdir(&dir.path().join("alpha/indexes/a"));

        assert_eq!(
            locate_dataset_root(dir.path()).expect("locate"),
            dir.path().join("alpha")
        );
    }

    #[test]
    fn deeper_decoy_file_never_beats_real_directory() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("real/indexes/main"));
        touch(&dir.path().join("real/deeper/nested/indexes"));

        assert_eq!(
            locate_dataset_root(dir.path()).expect("locate"),
            dir.path().join("real")
        );
    }

    #[test]
    fn stray_indexes_file_is_not_a_dataset_root() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("indexes"));
        mkdir(&dir.path().join("inner/indexes/main"));

        assert_eq!(
            locate_dataset_root(dir.path()).expect("locate"),
            dir.path().join("inner")
        );
    }

    #[test]
    fn missing_indexes_anywhere_is_a_layout_error() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("one/two/three"));

        let message = layout_message(locate_dataset_root(dir.path()).expect_err("no indexes"));
        assert!(message.contains("Could not find an 'indexes' folder"), "{message}");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycles_terminate() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("loop"));
        std::os::unix::fs::symlink(dir.path(), dir.path().join("loop/back")).expect("symlink");

        assert!(locate_dataset_root(dir.path()).is_err());
    }

    #[test]
    fn multiple_indexes_require_an_explicit_name() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("indexes/b"));
        mkdir(&dir.path().join("indexes/a"));

        let message = layout_message(select_index(dir.path(), None).expect_err("ambiguous"));
        assert!(message.contains("--index-name"), "{message}");
        assert!(message.ends_with("Available options: a, b"), "{message}");

        assert_eq!(select_index(dir.path(), Some("b")).expect("preferred"), "b");
    }

    #[test]
    fn empty_or_missing_indexes_are_layout_errors() {
        let dir = tempdir().expect("tempdir");
        let message = layout_message(select_index(dir.path(), None).expect_err("no indexes dir"));
        assert!(message.contains("has no 'indexes' directory"), "{message}");

        mkdir(&dir.path().join("indexes"));
        touch(&dir.path().join("indexes/readme.txt"));
        let message = layout_message(select_index(dir.path(), None).expect_err("no candidates"));
        assert!(message.starts_with("No index directories were found"), "{message}");
    }

    #[test]
    fn unknown_preferred_index_is_rejected() {
        let dir = tempdir().expect("tempdir");
        mkdir(&dir.path().join("indexes/present"));

        let message =
            layout_message(select_index(dir.path(), Some("absent")).expect_err("unknown"));
        assert!(message.contains("Index 'absent' was not found"), "{message}");
    }

    #[test]
    fn collection_file_is_used_directly() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection"));

        assert_eq!(
            infer_collection_path(dir.path()).expect("infer"),
            Some(dir.path().join("collection"))
        );
    }

    #[test]
    fn collection_directory_with_one_tsv_resolves_to_it() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection/passages.tsv"));
        touch(&dir.path().join("collection/README.md"));

        assert_eq!(
            infer_collection_path(dir.path()).expect("infer"),
            Some(dir.path().join("collection/passages.tsv"))
        );
    }

    #[test]
    fn collection_directory_with_two_tsvs_is_ambiguous() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection/a.tsv"));
        touch(&dir.path().join("collection/b.tsv"));

        let message = layout_message(infer_collection_path(dir.path()).expect_err("ambiguous"));
        assert!(message.contains("Multiple TSV files"), "{message}");
        assert!(message.contains("a.tsv, b.tsv"), "{message}");
    }

    #[test]
    fn collection_directory_without_tsv_falls_back_to_directory() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection/passages.jsonl"));

        assert_eq!(
            infer_collection_path(dir.path()).expect("infer"),
            Some(dir.path().join("collection"))
        );
    }

    #[test]
    fn root_level_collection_tsv_is_found() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection.wiki.tsv"));
        touch(&dir.path().join("other.tsv"));

        assert_eq!(
            infer_collection_path(dir.path()).expect("infer"),
            Some(dir.path().join("collection.wiki.tsv"))
        );
    }

    #[test]
    fn nothing_to_infer_yields_none() {
        let dir = tempdir().expect("tempdir");
        touch(&dir.path().join("collection-a.tsv"));
        touch(&dir.path().join("collection-b.tsv"));
        assert_eq!(infer_collection_path(dir.path()).expect("infer"), None);

        let empty = tempdir().expect("tempdir");
        assert_eq!(infer_collection_path(empty.path()).expect("infer"), None);
    }
}
