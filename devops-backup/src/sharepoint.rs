#![doc = "SharePoint REST client: mirrors the archive tree into a document library folder."]
//
//! # SharePoint Integration
//!
//! [`SharePointClient`] implements the core's [`RemoteStore`] trait using the SharePoint REST API
//! with an app-only (ACS client-credentials) bearer token.
//!
//! ## Authentication
//! 1. Realm discovery: an anonymous bearer request to `{site}/_vti_bin/client.svc` answers `401`
//!    with a `WWW-Authenticate: Bearer realm="..."` header.
//! 2. Token: `POST https://accounts.accesscontrol.windows.net/{realm}/tokens/OAuth/2` with
//!    `client_id@realm`, the client secret and the SharePoint principal resource.
//!
//! The token is cached until shortly before it expires.
//!
//! ## Folders and files
//! - [`RemoteStore::ensure_dir`] walks every prefix of the target folder, creating missing ones.
//! - [`RemoteStore::upload_file`] uses `Files/add(url=...,overwrite=true)` so re-runs replace files.
//!   Files above 100 MiB are created empty and then streamed in 10 MiB slices through an upload
//!   session (`StartUpload`, `ContinueUpload`, `FinishUpload`), cancelled if any slice fails.

use async_trait::async_trait;
use devops_backup_core::contract::RemoteStore;
use devops_backup_core::{BackupError, Result};
use regex::Regex;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::load_config::SharePointSettings;

const ACS_HOST: &str = "https://accounts.accesscontrol.windows.net";
const SHAREPOINT_PRINCIPAL: &str = "00000003-0000-0ff1-ce00-000000000000";
const ODATA_JSON: &str = "application/json;odata=nometadata";

/// Tokens are refreshed this long before ACS says they expire.
const TOKEN_SLACK: Duration = Duration::from_secs(300);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Files up to this size go up in a single `Files/add` request.
const SIMPLE_UPLOAD_LIMIT: u64 = 100 * 1024 * 1024;
/// Slice size of an upload session for larger files.
const UPLOAD_CHUNK_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// ACS sends this as a string; other issuers send a number.
    expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    fn lifetime(&self) -> Duration {
        let seconds = match &self.expires_in {
            Some(serde_json::Value::Number(n)) => n.as_u64(),
            Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        seconds.map(Duration::from_secs).unwrap_or(DEFAULT_TOKEN_LIFETIME)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FolderDto {
    #[serde(default)]
    exists: bool,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct SharePointClient {
    http: Client,
    site_url: String,
    /// Server-relative path of the site, e.g. `/sites/it`. Empty for the root site.
    site_path: String,
    host: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SharePointClient {
    pub fn new(settings: &SharePointSettings) -> anyhow::Result<Self> {
        let url = Url::parse(&settings.site_url).map_err(|e| {
            tracing::error!(error = ?e, url = %settings.site_url, "Invalid SharePoint site URL");
            anyhow::anyhow!("Invalid SHAREPOINT_URL '{}': {e}", settings.site_url)
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("SHAREPOINT_URL '{}' has no host", settings.site_url))?
            .to_string();
        let site_path = urlencoding::decode(url.path().trim_end_matches('/'))?.into_owned();

        tracing::info!(site_url = %settings.site_url, host = %host, "Initialized SharePoint client");
        Ok(Self {
            http: Client::new(),
            site_url: settings.site_url.trim_end_matches('/').to_string(),
            site_path,
            host,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
            tracing::debug!("SharePoint token expiring, refreshing");
        }

        let realm = self.discover_realm().await?;
        let response = self.request_token(&realm).await?;
        let lifetime = response.lifetime();
        let value = response.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_SLACK),
        });
        tracing::info!(expires_in_secs = lifetime.as_secs(), "Obtained SharePoint access token");
        Ok(value)
    }

    async fn discover_realm(&self) -> Result<String> {
        let url = format!("{}/_vti_bin/client.svc", self.site_url);
        let response = self
            .http
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, "Bearer")
            .send()
            .await
            .map_err(|e| remote_error("realm discovery", &url, e))?;

        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::error!(status = %response.status(), url = %url, "No WWW-Authenticate header");
                BackupError::Remote(format!(
                    "{url} returned {} without a WWW-Authenticate header",
                    response.status()
                ))
            })?;

        parse_realm(header).ok_or_else(|| {
            tracing::error!(header, "No realm in WWW-Authenticate header");
            BackupError::Remote(format!("no realm in WWW-Authenticate header: {header}"))
        })
    }

    async fn request_token(&self, realm: &str) -> Result<TokenResponse> {
        let url = format!("{ACS_HOST}/{realm}/tokens/OAuth/2");
        let client_id = format!("{}@{realm}", self.client_id);
        let resource = format!("{SHAREPOINT_PRINCIPAL}/{}@{realm}", self.host);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("resource", resource.as_str()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| remote_error("token request", &url, e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "SharePoint token request rejected");
            return Err(BackupError::Remote(format!(
                "token request returned {status}: {body}"
            )));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| remote_error("token response", &url, e))
    }

    fn folder_url(&self, server_relative: &str) -> String {
        format!(
            "{}/_api/web/GetFolderByServerRelativeUrl('{}')",
            self.site_url,
            odata_literal(server_relative)
        )
    }

    async fn folder_exists(&self, token: &str, server_relative: &str) -> Result<bool> {
        let url = format!("{}?$select=Exists", self.folder_url(server_relative));
        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .header(ACCEPT, ODATA_JSON)
            .send()
            .await
            .map_err(|e| remote_error("folder lookup", &url, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let folder: FolderDto = response
                    .json()
                    .await
                    .map_err(|e| remote_error("folder lookup", &url, e))?;
                Ok(folder.exists)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::error!(status = %status, folder = server_relative, body = %body, "Folder lookup failed");
                Err(BackupError::Remote(format!(
                    "folder lookup for '{server_relative}' returned {status}"
                )))
            }
        }
    }

    async fn create_folder(&self, token: &str, server_relative: &str) -> Result<()> {
        let url = format!(
            "{}/_api/web/folders/add('{}')",
            self.site_url,
            odata_literal(server_relative)
        );
        self.post(token, "folder creation", &url, Vec::new()).await?;
        tracing::info!(folder = server_relative, "[MIRROR] Created remote folder");
        Ok(())
    }

    /// POSTs `body` to `url` and fails on any non-success status.
    async fn post(&self, token: &str, action: &str, url: &str, body: Vec<u8>) -> Result<()> {
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(ACCEPT, ODATA_JSON)
            .body(body)
            .send()
            .await
            .map_err(|e| remote_error(action, url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, action, url, body = %body, "SharePoint request rejected");
            return Err(BackupError::Remote(format!(
                "{action} at {url} returned {status}"
            )));
        }
        Ok(())
    }

    fn add_file_url(&self, folder: &str, name: &str) -> String {
        format!(
            "{}/Files/add(url='{}',overwrite=true)",
            self.folder_url(folder),
            odata_literal(name)
        )
    }

    fn file_url(&self, server_relative_file: &str) -> String {
        format!(
            "{}/_api/web/GetFileByServerRelativeUrl('{}')",
            self.site_url,
            odata_literal(server_relative_file)
        )
    }

    /// Uploads `file` through an upload session, one slice per request.
    async fn upload_chunked(&self, folder: &str, name: &str, file: &Path, size: u64) -> Result<()> {
        // The session writes into an existing file, so create it empty first.
        let token = self.access_token().await?;
        self.post(&token, "upload", &self.add_file_url(folder, name), Vec::new())
            .await?;

        let upload_id = Uuid::new_v4();
        let file_url = self.file_url(&format!("{folder}/{name}"));
        tracing::info!(folder, file = name, bytes = size, upload_id = %upload_id, "[MIRROR] Starting chunked upload");

        let result = self.send_chunks(&file_url, &upload_id, file, size).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, upload_id = %upload_id, "Chunked upload failed, cancelling session");
            let cancel_url = format!("{file_url}/CancelUpload(uploadId=guid'{upload_id}')");
            let cancelled = match self.access_token().await {
                Ok(token) => self.post(&token, "cancel upload", &cancel_url, Vec::new()).await,
                Err(e) => Err(e),
            };
            if let Err(e) = cancelled {
                tracing::warn!(error = %e, upload_id = %upload_id, "Could not cancel upload session");
            }
        }
        result
    }

    async fn send_chunks(&self, file_url: &str, upload_id: &Uuid, file: &Path, size: u64) -> Result<()> {
        let mut source = tokio::fs::File::open(file)
            .await
            .map_err(|e| BackupError::io(file, e))?;
        for chunk in chunk_plan(size, UPLOAD_CHUNK_SIZE) {
            let mut buf = vec![0u8; chunk.len];
            source
                .read_exact(&mut buf)
                .await
                .map_err(|e| BackupError::io(file, e))?;
            let token = self.access_token().await?;
            self.post(&token, "chunk upload", &chunk_url(file_url, upload_id, &chunk), buf)
                .await?;
            tracing::debug!(offset = chunk.offset, len = chunk.len, step = ?chunk.step, "Uploaded chunk");
        }
        Ok(())
    }

    /// Server-relative path of `{remote_root}/{relative_dir}` below the site.
    fn server_relative(&self, remote_root: &str, relative_dir: &str) -> String {
        let mut path = self.site_path.clone();
        for segment in remote_root.split('/').chain(relative_dir.split('/')) {
            if !segment.is_empty() {
                path.push('/');
                path.push_str(segment);
            }
        }
        path
    }
}

fn remote_error(action: &str, url: &str, e: reqwest::Error) -> BackupError {
    tracing::error!(error = ?e, url, action, "SharePoint request failed");
    BackupError::Remote(format!("{action} at {url} failed: {e}"))
}

/// Extracts `realm` from a `WWW-Authenticate: Bearer realm="...",client_id="..."` header.
fn parse_realm(header: &str) -> Option<String> {
    let re = Regex::new(r#"(?i)realm="([^"]+)""#).ok()?;
    re.captures(header)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Percent-encodes a path for use inside an OData string literal, keeping `/` separators.
fn odata_literal(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(&segment.replace('\'', "''")).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every ancestor of `server_relative` that lies strictly below `base`, ending with the path itself.
fn folder_chain(base: &str, server_relative: &str) -> Vec<String> {
    let rest = server_relative
        .strip_prefix(base)
        .unwrap_or(server_relative)
        .trim_start_matches('/');
    let mut current = base.to_string();
    rest.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkStep {
    Start,
    Continue,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    step: ChunkStep,
    offset: u64,
    len: usize,
}

/// Splits `size` bytes into upload slices. `size` must span at least two slices.
fn chunk_plan(size: u64, chunk_size: usize) -> Vec<Chunk> {
    let slice = chunk_size as u64;
    let count = size.div_ceil(slice);
    (0..count)
        .map(|i| {
            let offset = i * slice;
            let step = match i {
                0 => ChunkStep::Start,
                i if i + 1 == count => ChunkStep::Finish,
                _ => ChunkStep::Continue,
            };
            Chunk {
                step,
                offset,
                len: (size - offset).min(slice) as usize,
            }
        })
        .collect()
}

fn chunk_url(file_url: &str, upload_id: &Uuid, chunk: &Chunk) -> String {
    match chunk.step {
        ChunkStep::Start => format!("{file_url}/StartUpload(uploadId=guid'{upload_id}')"),
        ChunkStep::Continue => format!(
            "{file_url}/ContinueUpload(uploadId=guid'{upload_id}',fileOffset={})",
            chunk.offset
        ),
        ChunkStep::Finish => format!(
            "{file_url}/FinishUpload(uploadId=guid'{upload_id}',fileOffset={})",
            chunk.offset
        ),
    }
}

#[async_trait]
impl RemoteStore for SharePointClient {
    async fn ensure_dir(&self, remote_root: &str, relative_dir: &str) -> Result<()> {
        let token = self.access_token().await?;
        let target = self.server_relative(remote_root, relative_dir);
        for folder in folder_chain(&self.site_path, &target) {
            if !self.folder_exists(&token, &folder).await? {
                self.create_folder(&token, &folder).await?;
            }
        }
        Ok(())
    }

    async fn upload_file(&self, remote_root: &str, relative_dir: &str, file: &Path) -> Result<()> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| BackupError::InvalidPath {
                path: file.to_path_buf(),
                reason: "file name is not valid UTF-8",
            })?;
        let size = tokio::fs::metadata(file)
            .await
            .map_err(|e| BackupError::io(file, e))?
            .len();
        let folder = self.server_relative(remote_root, relative_dir);

        if size > SIMPLE_UPLOAD_LIMIT {
            self.upload_chunked(&folder, name, file, size).await?;
        } else {
            let content = tokio::fs::read(file)
                .await
                .map_err(|e| BackupError::io(file, e))?;
            let token = self.access_token().await?;
            self.post(&token, "upload", &self.add_file_url(&folder, name), content)
                .await?;
        }
        tracing::info!(folder = %folder, file = name, bytes = size, "[MIRROR] Uploaded file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(site_url: &str) -> SharePointClient {
        SharePointClient::new(&SharePointSettings {
            site_url: site_url.into(),
            dir: "Shared Documents/DevOps".into(),
            client_id: "id".into(),
            client_secret: "secret".into(),
        })
        .unwrap()
    }

    #[test]
    fn realm_is_read_from_bearer_challenge() {
        let header = r#"Bearer realm="3b1c5c1a-0000-4f00-9f3e-1234567890ab",client_id="00000003-0000-0ff1-ce00-000000000000",trusted_issuers="x""#;
        assert_eq!(
            parse_realm(header).as_deref(),
            Some("3b1c5c1a-0000-4f00-9f3e-1234567890ab")
        );
        assert_eq!(parse_realm("Bearer error=\"invalid\""), None);
    }

    #[test]
    fn server_relative_paths_are_rooted_at_the_site() {
        let sp = client("https://contoso.sharepoint.com/sites/it/");
        assert_eq!(sp.site_path, "/sites/it");
        assert_eq!(
            sp.server_relative("Shared Documents/DevOps", "Payments/git"),
            "/sites/it/Shared Documents/DevOps/Payments/git"
        );
        assert_eq!(
            sp.server_relative("Shared Documents/DevOps", ""),
            "/sites/it/Shared Documents/DevOps"
        );
    }

    #[test]
    fn folder_chain_lists_every_prefix_below_the_site() {
        let chain = folder_chain("/sites/it", "/sites/it/Docs/DevOps/P1");
        assert_eq!(
            chain,
            vec![
                "/sites/it/Docs".to_string(),
                "/sites/it/Docs/DevOps".to_string(),
                "/sites/it/Docs/DevOps/P1".to_string(),
            ]
        );
    }

    #[test]
    fn odata_literals_escape_quotes_and_spaces() {
        assert_eq!(
            odata_literal("/sites/it/Shared Documents/O'Brien"),
            "/sites/it/Shared%20Documents/O%27%27Brien"
        );
    }

    #[test]
    fn token_lifetime_accepts_string_or_number() {
        let acs: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":"86399"}"#).unwrap();
        assert_eq!(acs.lifetime(), Duration::from_secs(86399));
        let numeric: TokenResponse =
            serde_json::from_str(r#"{"access_token":"t","expires_in":600}"#).unwrap();
        assert_eq!(numeric.lifetime(), Duration::from_secs(600));
        let missing: TokenResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert_eq!(missing.lifetime(), DEFAULT_TOKEN_LIFETIME);
    }

    #[test]
    fn chunk_plan_starts_continues_and_finishes() {
        let plan = chunk_plan(25, 10);
        assert_eq!(
            plan,
            vec![
                Chunk { step: ChunkStep::Start, offset: 0, len: 10 },
                Chunk { step: ChunkStep::Continue, offset: 10, len: 10 },
                Chunk { step: ChunkStep::Finish, offset: 20, len: 5 },
            ]
        );
    }

    #[test]
    fn chunk_plan_for_exact_multiple_has_no_empty_tail() {
        let plan = chunk_plan(20, 10);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1], Chunk { step: ChunkStep::Finish, offset: 10, len: 10 });
        let total: usize = chunk_plan(SIMPLE_UPLOAD_LIMIT + 1, UPLOAD_CHUNK_SIZE)
            .iter()
            .map(|c| c.len)
            .sum();
        assert_eq!(total as u64, SIMPLE_UPLOAD_LIMIT + 1);
    }

    #[test]
    fn chunk_urls_carry_session_and_offset() {
        let id = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let file_url = "https://x/_api/web/GetFileByServerRelativeUrl('/Docs/a.zip')";
        let start = Chunk { step: ChunkStep::Start, offset: 0, len: 1 };
        let next = Chunk { step: ChunkStep::Continue, offset: 10485760, len: 1 };
        assert_eq!(
            chunk_url(file_url, &id, &start),
            format!("{file_url}/StartUpload(uploadId=guid'67e55044-10b1-426f-9247-bb680e5fe0c8')")
        );
        assert_eq!(
            chunk_url(file_url, &id, &next),
            format!("{file_url}/ContinueUpload(uploadId=guid'67e55044-10b1-426f-9247-bb680e5fe0c8',fileOffset=10485760)")
        );
    }
}
