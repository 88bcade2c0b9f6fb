use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use common::error::AppError;
use flate2::read::GzDecoder;
use tracing::{debug, info};

use crate::ARCHIVES_DIRNAME;

/// Archive name suffixes that `extract_archives` knows how to unpack,
/// longest first so compound suffixes win over plain `.tar`.
pub const SUPPORTED_ARCHIVE_SUFFIXES: [&str; 6] =
    [".tar.gz", ".tar.zst", ".tgz", ".tzst", ".tar", ".zip"];

/// Tarball compressions recognised as archives but not unpacked. Finding
/// one is an error rather than a silent skip.
const UNSUPPORTED_ARCHIVE_SUFFIXES: [&str; 4] = [".tar.bz2", ".tbz2", ".tar.xz", ".txz"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarZst,
}

impl ArchiveFormat {
    fn detect(file_name: &str) -> Option<Self> {
        let lowered = file_name.to_ascii_lowercase();
        let suffix = SUPPORTED_ARCHIVE_SUFFIXES
            .iter()
            .find(|suffix| lowered.ends_with(*suffix))?;
        Some(match *suffix {
            ".tar.gz" | ".tgz" => Self::TarGz,
            ".tar.zst" | ".tzst" => Self::TarZst,
            ".zip" => Self::Zip,
            _ => Self::Tar,
        })
    }
}

pub fn is_supported_archive(file_name: &str) -> bool {
    ArchiveFormat::detect(file_name).is_some()
}

/// Unpack every supported archive in `snapshot_path/archives` into
/// `extract_to`, in lexicographic file-name order. Later archives overwrite
/// files written by earlier ones.
///
/// Fails when the archives directory is missing, when a bzip2 or xz tarball
/// is present, when any archive cannot be unpacked, or when no supported
/// archive was found.
pub fn extract_archives(snapshot_path: &Path, extract_to: &Path) -> Result<PathBuf, AppError> {
    let archives_dir = snapshot_path.join(ARCHIVES_DIRNAME);
    if !archives_dir.is_dir() {
        return Err(AppError::layout(format!(
            "Archives directory not found at {}",
            archives_dir.display()
        )));
    }

    let mut entries: Vec<(String, PathBuf)> = fs::read_dir(&archives_dir)?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_file()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    fs::create_dir_all(extract_to)?;

    let mut extracted = 0usize;
    for (name, path) in entries {
        let Some(format) = ArchiveFormat::detect(&name) else {
            let lowered = name.to_ascii_lowercase();
            if UNSUPPORTED_ARCHIVE_SUFFIXES
                .iter()
                .any(|suffix| lowered.ends_with(suffix))
            {
                return Err(AppError::layout(format!(
                    "Archive {name} uses an unsupported compression; supported formats: {}",
                    SUPPORTED_ARCHIVE_SUFFIXES.join(", ")
                )));
            }
            debug!(archive = %name, "Skipping unsupported file in archives directory");
            continue;
        };

        info!(archive = %name, destination = %extract_to.display(), "Extracting archive");
        unpack(format, &path, extract_to).map_err(|err| {
            AppError::layout(format!("Failed to extract archive {name}: {err}"))
        })?;
        extracted = extracted.saturating_add(1);
    }

    if extracted == 0 {
        return Err(AppError::layout(format!(
            "No supported archives found in {}",
            archives_dir.display()
        )));
    }

    info!(count = extracted, "Archive extraction complete");
    Ok(extract_to.to_path_buf())
}

fn unpack(format: ArchiveFormat, archive: &Path, destination: &Path) -> anyhow::Result<()> {
    let file = BufReader::new(File::open(archive)?);
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file)?;
            zip.extract(destination)?;
        }
        ArchiveFormat::Tar => unpack_tar(file, destination)?,
        ArchiveFormat::TarGz => unpack_tar(GzDecoder::new(file), destination)?,
        ArchiveFormat::TarZst => unpack_tar(zstd::stream::read::Decoder::new(file)?, destination)?,
    }
    Ok(())
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> std::io::Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive.unpack(destination)
}
