//! Google Drive artifact store
//!
//! Talks to the Drive v3 REST API with a service account: a short-lived
//! RS256 JWT is exchanged for a bearer token, refreshed when close to
//! expiry so post-run uploads still work after a long server session.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::error::{KeeperError, Result};

use super::{ArtifactRef, ArtifactStore};

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_API: &str = "https://www.googleapis.com/upload/drive/v3";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Refresh the bearer token when less than this much lifetime remains
const TOKEN_SLACK: Duration = Duration::from_secs(60);

/// Service account key file contents (the fields this client needs)
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct TokenClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Drive-backed implementation of [`ArtifactStore`]
pub struct DriveStore {
    http: Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

impl DriveStore {
    /// Load the service account key and prepare the client.
    ///
    /// No network traffic happens here; the first remote call mints the
    /// bearer token.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading service account key");
        let raw = std::fs::read_to_string(path)?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        Ok(Self {
            http: Client::new(),
            key,
            signing_key,
            token: tokio::sync::Mutex::new(None),
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at.saturating_duration_since(Instant::now()) > TOKEN_SLACK {
                return Ok(token.access_token.clone());
            }
        }

        debug!("minting new drive bearer token");
        let now = jsonwebtoken::get_current_timestamp();
        let claims = TokenClaims {
            iss: &self.key.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        info!("drive authenticated");
        Ok(access_token)
    }
}

/// Drive query strings wrap values in single quotes
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Open a file as a streaming request body; snapshot archives are whole
/// world directories and must never be buffered in memory.
async fn file_body(path: &Path) -> Result<(u64, ReaderStream<tokio::fs::File>)> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((len, ReaderStream::new(file)))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(KeeperError::Api {
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    id: String,
    name: String,
}

#[async_trait]
impl ArtifactStore for DriveStore {
    async fn find(&self, title: &str, folder_id: &str) -> Result<Option<ArtifactRef>> {
        let token = self.bearer_token().await?;
        let query = format!(
            "'{}' in parents and name = '{}' and trashed = false",
            escape_query_value(folder_id),
            escape_query_value(title)
        );
        debug!(title, folder_id, "searching drive folder");

        let response = self
            .http
            .get(format!("{DRIVE_API}/files"))
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)"), ("pageSize", "10")])
            .send()
            .await?;
        let list: FileList = check_status(response).await?.json().await?;

        // First match wins; titles are unique within a folder by convention only
        Ok(list.files.into_iter().next().map(|f| ArtifactRef {
            id: f.id,
            title: f.name,
        }))
    }

    async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> Result<()> {
        let token = self.bearer_token().await?;
        info!(title = %artifact.title, dest = %dest.display(), "downloading artifact");

        let response = self
            .http
            .get(format!("{DRIVE_API}/files/{}", artifact.id))
            .bearer_auth(token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(KeeperError::ArtifactNotFound {
                title: artifact.title.clone(),
            });
        }
        let mut response = check_status(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        info!(title = %artifact.title, "artifact downloaded");
        Ok(())
    }

    async fn upload(&self, local_path: &Path, title: &str, folder_id: &str) -> Result<ArtifactRef> {
        let token = self.bearer_token().await?;
        info!(title, folder_id, "uploading artifact");

        // Two-step resumable upload: create the session with the metadata,
        // then put the content against the session URI.
        let metadata = serde_json::json!({
            "name": title,
            "parents": [folder_id],
        });
        let response = self
            .http
            .post(format!("{DRIVE_UPLOAD_API}/files"))
            .bearer_auth(&token)
            .query(&[("uploadType", "resumable")])
            .json(&metadata)
            .send()
            .await?;
        let response = check_status(response).await?;
        let session_uri = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| KeeperError::Api {
                status: 500,
                message: "upload session response carried no location header".to_string(),
            })?
            .to_string();

        let (content_length, stream) = file_body(local_path).await?;
        // The token minted for the session setup may be near expiry by
        // the time a multi-gigabyte transfer starts; take a fresh one.
        let token = self.bearer_token().await?;
        let response = self
            .http
            .put(&session_uri)
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;
        let created: FileEntry = check_status(response).await?.json().await?;

        info!(title, id = %created.id, "artifact uploaded");
        Ok(ArtifactRef {
            id: created.id,
            title: created.name,
        })
    }

    async fn delete(&self, artifact: &ArtifactRef) -> Result<()> {
        let token = self.bearer_token().await?;
        info!(title = %artifact.title, "deleting remote artifact");

        let response = self
            .http
            .delete(format!("{DRIVE_API}/files/{}", artifact.id))
            .bearer_auth(token)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}
