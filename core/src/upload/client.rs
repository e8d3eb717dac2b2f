use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::error::CoreError;
use crate::models::{Comment, MediaKind, MediaRecord, Reaction};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Server-side import job created for one upload run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
    #[serde(default)]
    pub container_id: Option<String>,
    /// Album label → server album id. The empty label is the default bucket.
    #[serde(default)]
    pub album_ids: BTreeMap<String, String>,
}

impl JobHandle {
    pub fn album_id_for(&self, album: Option<&str>) -> Option<&str> {
        album
            .and_then(|label| self.album_ids.get(label))
            .or_else(|| self.album_ids.get(""))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetMetadata {
    pub job_id: String,
    pub source_identity: String,
    pub filename: String,
    pub taken_at: Option<String>,
    pub description: Option<String>,
    pub kind: MediaKind,
    pub album: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub container_id: Option<String>,
    pub album_id: Option<String>,
    pub sha256: String,
    /// Server id of the front side when this record is a paired back.
    pub back_of: Option<String>,
}

impl AssetMetadata {
    pub fn for_record(record: &MediaRecord, job: &JobHandle, back_of: Option<String>) -> Self {
        Self {
            job_id: job.job_id.clone(),
            source_identity: record.source_identity.clone(),
            filename: record.filename.clone(),
            taken_at: record.created_at.map(|ts| ts.to_rfc3339()),
            description: record.description.clone(),
            kind: record.kind,
            album: record.album.clone(),
            latitude: record.geo.map(|g| g.latitude),
            longitude: record.geo.map(|g| g.longitude),
            container_id: job.container_id.clone(),
            album_id: job.album_id_for(record.album.as_deref()).map(str::to_string),
            sha256: record.sha256.clone(),
            back_of,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Imported { asset_id: String },
    Duplicate { asset_id: Option<String> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobTotals {
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Remote collaborator the upload orchestrator talks to.
#[async_trait]
pub trait AssetApi: Send + Sync {
    async fn start_job(&self, session_id: &str, albums: &[String]) -> Result<JobHandle, CoreError>;

    async fn upload_asset(
        &self,
        job: &JobHandle,
        content: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<UploadOutcome, CoreError>;

    /// Sends the comments and reactions of an already imported asset.
    async fn upload_batch(
        &self,
        job: &JobHandle,
        asset_id: &str,
        comments: &[Comment],
        reactions: &[Reaction],
    ) -> Result<(), CoreError>;

    async fn complete_job(&self, job: &JobHandle, totals: &JobTotals) -> Result<(), CoreError>;
}

#[derive(Serialize)]
struct StartJobRequest<'a> {
    session_id: &'a str,
    albums: &'a [String],
}

#[derive(Serialize)]
struct AnnotationsRequest<'a> {
    comments: &'a [Comment],
    reactions: &'a [Reaction],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AssetStatus {
    Imported,
    Duplicate,
    Failed,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    status: AssetStatus,
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl AssetResponse {
    fn into_outcome(self) -> UploadOutcome {
        match (self.status, self.asset_id) {
            (AssetStatus::Imported, Some(asset_id)) => UploadOutcome::Imported { asset_id },
            (AssetStatus::Imported, None) => UploadOutcome::Failed {
                reason: "imported without an asset id".to_string(),
            },
            (AssetStatus::Duplicate, asset_id) => UploadOutcome::Duplicate { asset_id },
            (AssetStatus::Failed, _) => UploadOutcome::Failed {
                reason: self.error.unwrap_or_else(|| "rejected by server".to_string()),
            },
        }
    }
}

pub struct HttpAssetApi {
    client: Client,
    config: ApiConfig,
}

impl HttpAssetApi {
    pub fn new(config: ApiConfig) -> Result<Self, CoreError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, CoreError> {
        Self::new(ApiConfig::from_env()?)
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.build_url(path))
            .header("Authorization", format!("Bearer {}", self.config.token))
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, CoreError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, CoreError> {
        let response = Self::send(request).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AssetApi for HttpAssetApi {
    async fn start_job(&self, session_id: &str, albums: &[String]) -> Result<JobHandle, CoreError> {
        let body = StartJobRequest { session_id, albums };
        Self::send_json(self.post("/imports").json(&body)).await
    }

    async fn upload_asset(
        &self,
        job: &JobHandle,
        content: &[u8],
        metadata: &AssetMetadata,
    ) -> Result<UploadOutcome, CoreError> {
        let metadata_json = serde_json::to_string(metadata)?;
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(content.to_vec()).file_name(metadata.filename.clone()),
            )
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata_json).mime_str("application/json")?,
            );
        let path = format!("/imports/{}/assets", job.job_id);
        let response: AssetResponse = Self::send_json(self.post(&path).multipart(form)).await?;
        Ok(response.into_outcome())
    }

    async fn upload_batch(
        &self,
        job: &JobHandle,
        asset_id: &str,
        comments: &[Comment],
        reactions: &[Reaction],
    ) -> Result<(), CoreError> {
        let path = format!("/imports/{}/assets/{}/annotations", job.job_id, asset_id);
        let body = AnnotationsRequest { comments, reactions };
        Self::send(self.post(&path).json(&body)).await?;
        Ok(())
    }

    async fn complete_job(&self, job: &JobHandle, totals: &JobTotals) -> Result<(), CoreError> {
        let path = format!("/imports/{}/complete", job.job_id);
        Self::send(self.post(&path).json(totals)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaOrigin;
    use mockito::Matcher;

    fn api(server: &mockito::Server) -> HttpAssetApi {
        HttpAssetApi::new(ApiConfig::new(server.url(), "tok")).expect("client")
    }

    fn job() -> JobHandle {
        JobHandle {
            job_id: "j1".to_string(),
            container_id: Some("c1".to_string()),
            album_ids: BTreeMap::from([
                (String::new(), "default".to_string()),
                ("Trip".to_string(), "a-trip".to_string()),
            ]),
        }
    }

    fn record() -> MediaRecord {
        MediaRecord {
            content: b"jpeg".to_vec(),
            filename: "1.jpg".to_string(),
            entry_path: "posts/media/1.jpg".to_string(),
            sha256: "abc".to_string(),
            source_identity: "media:posts/media/1.jpg".to_string(),
            created_at: None,
            description: None,
            kind: MediaKind::Photo,
            origin: MediaOrigin::Post,
            album: Some("Unknown album".to_string()),
            geo: None,
            comments: Vec::new(),
            reactions: Vec::new(),
        }
    }

    #[test]
    fn album_ids_fall_back_to_default_bucket() {
        let job = job();
        assert_eq!(job.album_id_for(Some("Trip")), Some("a-trip"));
        assert_eq!(job.album_id_for(Some("Other")), Some("default"));
        assert_eq!(job.album_id_for(None), Some("default"));
        let meta = AssetMetadata::for_record(&record(), &job, Some("front-1".to_string()));
        assert_eq!(meta.album_id.as_deref(), Some("default"));
        assert_eq!(meta.back_of.as_deref(), Some("front-1"));
    }

    #[tokio::test]
    async fn start_job_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/imports")
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "session_id": "s1",
                "albums": ["Trip"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"job_id":"j1","container_id":"c1","album_ids":{"":"d","Trip":"t"}}"#)
            .create_async()
            .await;

        let handle = api(&server)
            .start_job("s1", &["Trip".to_string()])
            .await
            .expect("start");
        assert_eq!(handle.job_id, "j1");
        assert_eq!(handle.album_id_for(Some("Trip")), Some("t"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upload_asset_maps_statuses() {
        let mut server = mockito::Server::new_async().await;
        let imported = server
            .mock("POST", "/imports/j1/assets")
            .match_body(Matcher::Regex("name=\"metadata\"".to_string()))
            .with_status(200)
            .with_body(r#"{"status":"imported","asset_id":"a1"}"#)
            .expect(1)
            .create_async()
            .await;

        let client = api(&server);
        let meta = AssetMetadata::for_record(&record(), &job(), None);
        let outcome = client.upload_asset(&job(), b"jpeg", &meta).await.expect("upload");
        assert_eq!(
            outcome,
            UploadOutcome::Imported {
                asset_id: "a1".to_string()
            }
        );
        imported.assert_async().await;

        let duplicate = AssetResponse {
            status: AssetStatus::Duplicate,
            asset_id: None,
            error: None,
        };
        assert_eq!(duplicate.into_outcome(), UploadOutcome::Duplicate { asset_id: None });
    }

    #[tokio::test]
    async fn server_errors_surface_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/imports/j1/complete")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let err = api(&server)
            .complete_job(&job(), &JobTotals::default())
            .await
            .unwrap_err();
        match err {
            CoreError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
