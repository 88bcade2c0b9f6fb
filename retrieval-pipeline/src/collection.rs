use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use common::error::AppError;
use tracing::{info, warn};

/// Passage text keyed by passage id, loaded from a tab-separated file of
/// `pid<TAB>text[<TAB>title]` rows.
#[derive(Debug, Default, Clone)]
pub struct Collection {
    passages: HashMap<u64, String>,
}

impl Collection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        if path.is_dir() {
            warn!(
                path = %path.display(),
                "Collection path is a directory without TSV files; passage text will be empty"
            );
            return Ok(Self::empty());
        }

        let file = File::open(path).map_err(|err| {
            AppError::Validation(format!("cannot open collection {}: {err}", path.display()))
        })?;
        let collection = Self::parse(BufReader::new(file))?;
        info!(path = %path.display(), passages = collection.len(), "Loaded collection");
        Ok(collection)
    }

    /// A leading row whose first column is not an integer is treated as a
    /// header. Blank lines are ignored.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, AppError> {
        let mut passages = HashMap::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = index.saturating_add(1);
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let mut columns = line.splitn(3, '\t');
            let pid_column = columns.next().unwrap_or_default().trim();
            let Ok(pid) = pid_column.parse::<u64>() else {
                if index == 0 {
                    continue;
                }
                return Err(AppError::Validation(format!(
                    "collection line {line_no}: invalid passage id '{pid_column}'"
                )));
            };
            let Some(text) = columns.next() else {
                return Err(AppError::Validation(format!(
                    "collection line {line_no}: missing passage text"
                )));
            };

            let passage = match columns.next().map(str::trim).filter(|t| !t.is_empty()) {
                Some(title) => format!("{title} | {text}"),
                None => text.to_string(),
            };
            passages.insert(pid, passage);
        }

        Ok(Self { passages })
    }

    pub fn get(&self, pid: u64) -> Option<&str> {
        self.passages.get(&pid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}
