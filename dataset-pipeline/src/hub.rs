use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::error::AppError;
use reqwest::{header::RANGE, Response, StatusCode};
use serde::Deserialize;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
};
use tracing::{debug, instrument};
use url::Url;

/// A single file in a dataset repository, addressed by its repo-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub size: Option<u64>,
}

/// File listing of a repository pinned to one commit.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub commit: String,
    pub files: Vec<RepoFile>,
}

/// Transport to a remote dataset repository.
///
/// `download` must be resumable: an interrupted call followed by a new one for
/// the same destination completes the file without starting over.
#[async_trait]
pub trait DatasetHub: Send + Sync {
    async fn snapshot(&self, repo_id: &str, revision: &str) -> Result<RepoSnapshot, AppError>;

    async fn download(
        &self,
        repo_id: &str,
        commit: &str,
        file: &RepoFile,
        destination: &Path,
    ) -> Result<u64, AppError>;
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    sha: String,
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Hugging Face Hub client for dataset repositories.
#[derive(Clone)]
pub struct HfHubClient {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HfHubClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, AppError> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            AppError::Validation(format!("invalid hub endpoint '{endpoint}': {err}"))
        })?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("dataset-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    fn url_with_segments<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, AppError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                AppError::Validation(format!("hub endpoint {} cannot be a base", self.endpoint))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn revision_url(&self, repo_id: &str, revision: &str) -> Result<Url, AppError> {
        let mut url = self.url_with_segments(
            ["api", "datasets"]
                .into_iter()
                .chain(repo_id.split('/'))
                .chain(["revision", revision]),
        )?;
        url.query_pairs_mut().append_pair("blobs", "true");
        Ok(url)
    }

    fn resolve_url(&self, repo_id: &str, commit: &str, path: &str) -> Result<Url, AppError> {
        self.url_with_segments(
            ["datasets"]
                .into_iter()
                .chain(repo_id.split('/'))
                .chain(["resolve", commit])
                .chain(path.split('/')),
        )
    }

    async fn send_download(&self, url: Url, offset: u64) -> Result<Response, AppError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl DatasetHub for HfHubClient {
    #[instrument(skip(self))]
    async fn snapshot(&self, repo_id: &str, revision: &str) -> Result<RepoSnapshot, AppError> {
        let url = self.revision_url(repo_id, revision)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = check_status(
            request.send().await?,
            &format!("dataset {repo_id}@{revision}"),
        )?;
        let info: RevisionInfo = response.json().await?;

        Ok(RepoSnapshot {
            commit: info.sha,
            files: info
                .siblings
                .into_iter()
                .map(|sibling| RepoFile {
                    path: sibling.rfilename,
                    size: sibling.size,
                })
                .collect(),
        })
    }

    #[instrument(skip(self, file), fields(path = %file.path))]
    async fn download(
        &self,
        repo_id: &str,
        commit: &str,
        file: &RepoFile,
        destination: &Path,
    ) -> Result<u64, AppError> {
        let url = self.resolve_url(repo_id, commit, &file.path)?;
        let partial = partial_path(destination);
        let mut offset = fs::metadata(&partial).await.map_or(0, |meta| meta.len());
        if offset > 0 && file.size == Some(offset) {
            debug!(offset, "partial download already complete");
            fs::rename(&partial, destination).await?;
            return Ok(0);
        }

        let mut response = self.send_download(url.clone(), offset).await?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            debug!(offset, "stale partial download, restarting from zero");
            remove_if_exists(&partial).await?;
            offset = 0;
            response = self.send_download(url, 0).await?;
        }
        let mut response = check_status(response, &file.path)?;

        let resumed = offset > 0 && response.status() == StatusCode::PARTIAL_CONTENT;
        let mut out = if resumed {
            debug!(offset, "resuming partial download");
            OpenOptions::new().append(true).open(&partial).await?
        } else {
            File::create(&partial).await?
        };

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            out.write_all(&chunk).await?;
            written = written.saturating_add(chunk.len() as u64);
        }
        out.flush().await?;
        drop(out);

        let total = if resumed {
            offset.saturating_add(written)
        } else {
            written
        };
        if let Some(expected) = file.size {
            if total != expected {
                if total > expected {
                    remove_if_exists(&partial).await?;
                }
                return Err(AppError::fetch(
                    format!(
                        "{}: received {total} bytes, expected {expected}",
                        file.path
                    ),
                    true,
                ));
            }
        }

        fs::rename(&partial, destination).await?;
        Ok(written)
    }
}

/// Sibling path that accumulates bytes until a download completes.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".incomplete");
    destination.with_file_name(name)
}

async fn remove_if_exists(path: &Path) -> Result<(), AppError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn check_status(response: Response, what: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::fetch(
            format!("{what}: authentication required or token rejected ({status})"),
            false,
        ),
        StatusCode::NOT_FOUND => AppError::fetch(
            format!("{what}: repository, revision or file not found"),
            false,
        ),
        other => AppError::fetch(
            format!("{what}: unexpected status {other}"),
            other.is_server_error() || other == StatusCode::TOO_MANY_REQUESTS,
        ),
    })
}

#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    //! In-memory hub for exercising the fetch pipeline without a network.

    use std::collections::BTreeMap;

    use tokio::sync::Mutex;

    use super::{async_trait, fs, AppError, DatasetHub, Path, RepoFile, RepoSnapshot};

    pub struct StaticHub {
        repo_id: String,
        commit: String,
        files: BTreeMap<String, Vec<u8>>,
        downloads: Mutex<Vec<String>>,
    }

    impl StaticHub {
        pub fn new(repo_id: &str, commit: &str) -> Self {
            Self {
                repo_id: repo_id.to_string(),
                commit: commit.to_string(),
                files: BTreeMap::new(),
                downloads: Mutex::new(Vec::new()),
            }
        }

        #[must_use]
        pub fn with_file(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
            self.files.insert(path.to_string(), contents.into());
            self
        }

        /// Repo paths passed to `download`, in call order.
        pub async fn downloads(&self) -> Vec<String> {
            self.downloads.lock().await.clone()
        }
    }

    #[async_trait]
    impl DatasetHub for StaticHub {
        async fn snapshot(
            &self,
            repo_id: &str,
            _revision: &str,
        ) -> Result<RepoSnapshot, AppError> {
            if repo_id != self.repo_id {
                return Err(AppError::fetch(
                    format!("dataset {repo_id}: repository, revision or file not found"),
                    false,
                ));
            }
            Ok(RepoSnapshot {
                commit: self.commit.clone(),
                files: self
                    .files
                    .iter()
                    .map(|(path, contents)| RepoFile {
                        path: path.clone(),
                        size: Some(contents.len() as u64),
                    })
                    .collect(),
            })
        }

        async fn download(
            &self,
            _repo_id: &str,
            _commit: &str,
            file: &RepoFile,
            destination: &Path,
        ) -> Result<u64, AppError> {
            let contents = self
                .files
                .get(&file.path)
                .ok_or_else(|| AppError::fetch(format!("{} not found", file.path), false))?;
            self.downloads.lock().await.push(file.path.clone());
            fs::write(destination, contents).await?;
            Ok(contents.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::{Path as AxumPath, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response as AxumResponse},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    const BLOB: &[u8] = b"0123456789abcdefghij";
    const COMMIT: &str = "c0ffee";

    #[derive(Clone, Default)]
    struct FakeHub {
        ranges: Arc<Mutex<Vec<Option<String>>>>,
    }

    async fn revision(
        AxumPath((owner, name, rev)): AxumPath<(String, String, String)>,
        headers: HeaderMap,
    ) -> AxumResponse {
        match (owner.as_str(), name.as_str(), rev.as_str()) {
            ("acme", "wiki", "main") => Json(json!({
                "sha": COMMIT,
                "siblings": [
                    { "rfilename": "archives/wiki.tar.gz", "size": BLOB.len() },
                    { "rfilename": "README.md" }
                ]
            }))
            .into_response(),
            ("acme", "private", "main") => {
                let authorised = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    == Some("Bearer let-me-in");
                if authorised {
                    Json(json!({ "sha": COMMIT, "siblings": [] })).into_response()
                } else {
                    AxumStatus::UNAUTHORIZED.into_response()
                }
            }
            _ => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn blob(State(state): State<FakeHub>, headers: HeaderMap) -> AxumResponse {
        let range = headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        state
            .ranges
            .lock()
            .expect("ranges lock")
            .push(range.clone());

        let start = range
            .as_deref()
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.strip_suffix('-'))
            .and_then(|value| value.parse::<usize>().ok());
        match start {
            Some(start) if start >= BLOB.len() => {
                AxumStatus::RANGE_NOT_SATISFIABLE.into_response()
            }
            Some(start) => (AxumStatus::PARTIAL_CONTENT, BLOB[start..].to_vec()).into_response(),
            None => (AxumStatus::OK, BLOB.to_vec()).into_response(),
        }
    }

    async fn spawn_fake_hub(state: FakeHub) -> String {
        let router = Router::new()
            .route("/api/datasets/{owner}/{name}/revision/{rev}", get(revision))
            .route(
                "/datasets/acme/wiki/resolve/{commit}/archives/wiki.tar.gz",
                get(blob),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake hub");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve fake hub");
        });
        format!("http://{addr}")
    }

    fn archive_file() -> RepoFile {
        RepoFile {
            path: "archives/wiki.tar.gz".into(),
            size: Some(BLOB.len() as u64),
        }
    }

    #[tokio::test]
    async fn snapshot_lists_files_and_commit() {
        let endpoint = spawn_fake_hub(FakeHub::default()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");

        let snapshot = client.snapshot("acme/wiki", "main").await.expect("snapshot");

        assert_eq!(snapshot.commit, COMMIT);
        assert_eq!(snapshot.files.len(), 2);
        assert_eq!(snapshot.files[0], archive_file());
        assert_eq!(snapshot.files[1].size, None);
    }

    #[tokio::test]
    async fn missing_repository_is_a_non_retryable_fetch_error() {
        let endpoint = spawn_fake_hub(FakeHub::default()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");

        let err = client
            .snapshot("acme/nope", "main")
            .await
            .expect_err("unknown repo must fail");

        assert!(matches!(err, AppError::RemoteFetch { .. }));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn private_repository_requires_a_valid_token() {
        let endpoint = spawn_fake_hub(FakeHub::default()).await;

        let anonymous = HfHubClient::new(&endpoint, None).expect("client");
        let err = anonymous
            .snapshot("acme/private", "main")
            .await
            .expect_err("anonymous access must fail");
        assert!(err.to_string().contains("authentication required"));

        let wrong = HfHubClient::new(&endpoint, Some("nope".into())).expect("client");
        assert!(wrong.snapshot("acme/private", "main").await.is_err());

        let authorised = HfHubClient::new(&endpoint, Some("let-me-in".into())).expect("client");
        authorised
            .snapshot("acme/private", "main")
            .await
            .expect("token grants access");
    }

    #[tokio::test]
    async fn download_writes_file_and_clears_partial() {
        let state = FakeHub::default();
        let endpoint = spawn_fake_hub(state.clone()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");
        let dir = tempdir().expect("tempdir");
        let destination = dir.path().join("wiki.tar.gz");

        let written = client
            .download("acme/wiki", COMMIT, &archive_file(), &destination)
            .await
            .expect("download");

        assert_eq!(written, BLOB.len() as u64);
        assert_eq!(std::fs::read(&destination).expect("read"), BLOB);
        assert!(!partial_path(&destination).exists());
        assert_eq!(*state.ranges.lock().expect("ranges"), vec![None]);
    }

    #[tokio::test]
    async fn interrupted_download_resumes_with_range_request() {
        let state = FakeHub::default();
        let endpoint = spawn_fake_hub(state.clone()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");
        let dir = tempdir().expect("tempdir");
        let destination = dir.path().join("wiki.tar.gz");
        std::fs::write(partial_path(&destination), &BLOB[..7]).expect("seed partial");

        let written = client
            .download("acme/wiki", COMMIT, &archive_file(), &destination)
            .await
            .expect("resume");

        assert_eq!(written, (BLOB.len() - 7) as u64);
        assert_eq!(std::fs::read(&destination).expect("read"), BLOB);
        assert_eq!(
            *state.ranges.lock().expect("ranges"),
            vec![Some("bytes=7-".to_string())]
        );
    }

    #[tokio::test]
    async fn oversized_partial_is_discarded_and_restarted() {
        let state = FakeHub::default();
        let endpoint = spawn_fake_hub(state.clone()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");
        let dir = tempdir().expect("tempdir");
        let destination = dir.path().join("wiki.tar.gz");
        std::fs::write(partial_path(&destination), vec![b'x'; BLOB.len() + 4])
            .expect("seed partial");

        client
            .download("acme/wiki", COMMIT, &archive_file(), &destination)
            .await
            .expect("restart");

        assert_eq!(std::fs::read(&destination).expect("read"), BLOB);
        let ranges = state.ranges.lock().expect("ranges").clone();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1], None);
    }

    #[tokio::test]
    async fn complete_partial_is_promoted_without_a_request() {
        let state = FakeHub::default();
        let endpoint = spawn_fake_hub(state.clone()).await;
        let client = HfHubClient::new(&endpoint, None).expect("client");
        let dir = tempdir().expect("tempdir");
        let destination = dir.path().join("wiki.tar.gz");
        std::fs::write(partial_path(&destination), BLOB).expect("seed partial");

        let written = client
            .download("acme/wiki", COMMIT, &archive_file(), &destination)
            .await
            .expect("promote");

        assert_eq!(written, 0);
        assert_eq!(std::fs::read(&destination).expect("read"), BLOB);
        assert!(!partial_path(&destination).exists());
        assert!(state.ranges.lock().expect("ranges").is_empty());
    }

    #[test]
    fn urls_encode_revision_and_nested_paths() {
        let client = HfHubClient::new("https://hub.example/", None).expect("client");

        let revision = client
            .revision_url("acme/wiki", "refs/pr/1")
            .expect("revision url");
        assert_eq!(
            revision.as_str(),
            "https://hub.example/api/datasets/acme/wiki/revision/refs%2Fpr%2F1?blobs=true"
        );

        let resolve = client
            .resolve_url("acme/wiki", COMMIT, "indexes/main/0.codes.pt")
            .expect("resolve url");
        assert_eq!(
            resolve.as_str(),
            "https://hub.example/datasets/acme/wiki/resolve/c0ffee/indexes/main/0.codes.pt"
        );
    }

    #[test]
    fn blank_token_is_ignored() {
        let client = HfHubClient::new("https://hub.example", Some("  ".into())).expect("client");
        assert!(client.token.is_none());
    }
}
