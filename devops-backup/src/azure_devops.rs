#![doc = "Azure DevOps REST client: project catalog and TFVC snapshot download for the backup pipeline."]
//
//! # Azure DevOps Integration
//!
//! [`DevOpsClient`] implements the core's [`ProjectCatalog`] and [`SnapshotSource`] traits
//! against the Azure DevOps REST API (`api-version=7.0`).
//!
//! - Projects: `GET {org}/_apis/projects`
//! - Repositories: `GET {org}/{project}/_apis/git/repositories`
//! - Wikis: `GET {org}/{project}/_apis/wiki/wikis`, each resolved to its backing git repository
//! - TFVC: `GET {org}/{project}/_apis/tfvc/items`; a project with any TFVC item has one legacy unit
//! - Snapshot: `POST {org}/{project}/_apis/tfvc/itembatch` with `Accept: application/zip`
//!
//! Authentication is HTTP basic with an empty user name and the personal access token.

use async_trait::async_trait;
use devops_backup_core::contract::{LegacyRepo, ProjectCatalog, RemoteRepo, SnapshotSource};
use devops_backup_core::{BackupError, Result};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::load_config::DevOpsSettings;

const API_VERSION: &str = "7.0";

/// Longest slice of an error response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ProjectDto {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitRepositoryDto {
    name: String,
    remote_url: String,
    #[serde(default)]
    is_disabled: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WikiDto {
    name: String,
    repository_id: String,
}

pub struct DevOpsClient {
    http: Client,
    organization_url: Url,
    personal_access_token: String,
}

impl DevOpsClient {
    pub fn new(settings: &DevOpsSettings) -> anyhow::Result<Self> {
        let organization_url = Url::parse(&settings.organization_url).map_err(|e| {
            tracing::error!(error = ?e, url = %settings.organization_url, "Invalid organization URL");
            anyhow::anyhow!("Invalid DEVOPS_ORGANIZATION_URL '{}': {e}", settings.organization_url)
        })?;
        if organization_url.cannot_be_a_base() {
            anyhow::bail!("DEVOPS_ORGANIZATION_URL must be an http(s) URL");
        }
        tracing::info!(organization_url = %organization_url, "Initialized Azure DevOps client");
        Ok(Self {
            http: Client::new(),
            organization_url,
            personal_access_token: settings.personal_access_token.clone(),
        })
    }

    /// `{org}/{segments...}?api-version=7.0`, with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.organization_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!(url = %url, "GET Azure DevOps API");
        let response = self
            .http
            .get(url.clone())
            .basic_auth("", Some(&self.personal_access_token))
            .send()
            .await
            .map_err(|e| catalog_error(&url, e))?;
        let response = ensure_success(&url, response).await?;
        response.json::<T>().await.map_err(|e| catalog_error(&url, e))
    }

    async fn get_repository(&self, project: &str, repository_id: &str) -> Result<GitRepositoryDto> {
        let url = self.endpoint(&[project, "_apis", "git", "repositories", repository_id]);
        self.get_json(url).await
    }
}

fn catalog_error(url: &Url, e: reqwest::Error) -> BackupError {
    tracing::error!(error = ?e, url = %url, "Azure DevOps request failed");
    BackupError::Catalog(format!("{url}: {e}"))
}

async fn ensure_success(url: &Url, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<Failed to decode response body>"));
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    tracing::error!(status = %status, url = %url, body = %body, "Azure DevOps API returned error");
    Err(BackupError::Catalog(format!("{url} returned {status}: {body}")))
}

#[async_trait]
impl ProjectCatalog for DevOpsClient {
    async fn list_projects(&self) -> Result<BTreeSet<String>> {
        let url = self.endpoint(&["_apis", "projects"]);
        let projects: ListResponse<ProjectDto> = self.get_json(url).await?;
        tracing::info!(count = projects.value.len(), "Fetched projects");
        Ok(projects.value.into_iter().map(|p| p.name).collect())
    }

    async fn list_repos(&self, project: &str) -> Result<Vec<RemoteRepo>> {
        let url = self.endpoint(&[project, "_apis", "git", "repositories"]);
        let repos: ListResponse<GitRepositoryDto> = self.get_json(url).await?;
        Ok(repos
            .value
            .into_iter()
            .filter(|repo| {
                if repo.is_disabled {
                    tracing::warn!(project, repo = %repo.name, "Skipping disabled repository");
                }
                !repo.is_disabled
            })
            .map(|repo| RemoteRepo {
                name: repo.name,
                remote_url: repo.remote_url,
            })
            .collect())
    }

    async fn list_wikis(&self, project: &str) -> Result<Vec<RemoteRepo>> {
        let url = self.endpoint(&[project, "_apis", "wiki", "wikis"]);
        let wikis: ListResponse<WikiDto> = self.get_json(url).await?;

        let mut result = Vec::with_capacity(wikis.value.len());
        for wiki in wikis.value {
            let repo = self.get_repository(project, &wiki.repository_id).await?;
            tracing::debug!(project, wiki = %wiki.name, repo = %repo.name, "Resolved wiki repository");
            result.push(RemoteRepo {
                name: repo.name,
                remote_url: repo.remote_url,
            });
        }
        Ok(result)
    }

    async fn list_legacy_units(&self, project: &str) -> Result<Vec<LegacyRepo>> {
        let mut url = self.endpoint(&[project, "_apis", "tfvc", "items"]);
        url.query_pairs_mut()
            .append_pair("scopePath", &format!("$/{project}"))
            .append_pair("recursionLevel", "OneLevel");

        let response = self
            .http
            .get(url.clone())
            .basic_auth("", Some(&self.personal_access_token))
            .send()
            .await
            .map_err(|e| catalog_error(&url, e))?;

        // Git-only projects have no TFVC tree at all.
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(project, "Project has no TFVC content");
            return Ok(Vec::new());
        }
        let response = ensure_success(&url, response).await?;
        let items: ListResponse<IgnoredAny> =
            response.json().await.map_err(|e| catalog_error(&url, e))?;

        if items.value.is_empty() {
            return Ok(Vec::new());
        }
        // TFVC has a single repository per project, named after it.
        Ok(vec![LegacyRepo {
            name: project.to_string(),
        }])
    }
}

#[async_trait]
impl SnapshotSource for DevOpsClient {
    async fn download_zip(&self, project: &str, dest_path: &Path) -> Result<()> {
        let url = self.endpoint(&[project, "_apis", "tfvc", "itembatch"]);
        let body = serde_json::json!({
            "itemDescriptors": [{ "path": format!("$/{project}"), "recursionLevel": "full" }],
            "includeContentMetadata": true,
            "includeLinks": true,
        });
        let snapshot_error = |message: String| BackupError::Snapshot {
            project: project.to_string(),
            message,
        };

        tracing::info!(project, dest = %dest_path.display(), "Downloading TFVC snapshot");
        let response = self
            .http
            .post(url.clone())
            .basic_auth("", Some(&self.personal_access_token))
            .header(ACCEPT, "application/zip")
            .json(&body)
            .send()
            .await
            .map_err(|e| snapshot_error(format!("{url}: {e}")))?;
        let mut response = ensure_success(&url, response)
            .await
            .map_err(|e| snapshot_error(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest_path)
            .await
            .map_err(|e| BackupError::io(dest_path, e))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| snapshot_error(format!("download interrupted: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| BackupError::io(dest_path, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| BackupError::io(dest_path, e))?;

        tracing::info!(project, bytes = written, "Repository zip downloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(org: &str) -> DevOpsClient {
        DevOpsClient::new(&DevOpsSettings {
            organization_url: org.into(),
            personal_access_token: "pat".into(),
        })
        .unwrap()
    }

    #[test]
    fn endpoint_encodes_project_names() {
        let client = client("https://dev.azure.com/contoso");
        let url = client.endpoint(&["Legacy Apps", "_apis", "git", "repositories"]);
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/contoso/Legacy%20Apps/_apis/git/repositories?api-version=7.0"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let client = client("https://dev.azure.com/contoso/");
        let url = client.endpoint(&["_apis", "projects"]);
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/contoso/_apis/projects?api-version=7.0"
        );
    }

    #[test]
    fn repository_listing_parses_remote_urls() {
        let json = r#"{"value":[{"id":"1","name":"api","remoteUrl":"https://contoso@dev.azure.com/contoso/P/_git/api","isDisabled":false},{"id":"2","name":"old","remoteUrl":"u"}],"count":2}"#;
        let parsed: ListResponse<GitRepositoryDto> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.value.len(), 2);
        assert_eq!(
            parsed.value[0].remote_url,
            "https://contoso@dev.azure.com/contoso/P/_git/api"
        );
        assert!(!parsed.value[1].is_disabled);
    }

    #[test]
    fn tfvc_items_are_only_counted() {
        let json = r#"{"count":2,"value":[{"version":12,"changeDate":"2019-04-01T10:00:00Z","path":"$/Legacy","isFolder":true,"url":"u"},{"version":12,"path":"$/Legacy/Main","isFolder":true}]}"#;
        let parsed: ListResponse<IgnoredAny> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.value.len(), 2);

        let empty: ListResponse<IgnoredAny> =
            serde_json::from_str(r#"{"count":0,"value":[]}"#).unwrap();
        assert!(empty.value.is_empty());
    }
}
