use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::multipart::Field;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// 10 MB limit for avatar and cover images
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Where uploaded images end up. Only the returned URL is stored with the user.
pub enum MediaStorage {
    /// Remote upload service that accepts a multipart `file` field and replies
    /// with `{ "url": ..., "secure_url": ... }`.
    Remote {
        client: reqwest::Client,
        upload_url: String,
    },
    /// Content-addressed files in a local directory served under `public_base_url`.
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
}

#[derive(Deserialize)]
struct RemoteUploadResponse {
    url: String,
    secure_url: Option<String>,
}

impl MediaStorage {
    /// `timeout` bounds a whole upload; connecting gets at most 10 seconds of it.
    pub fn remote(upload_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .context("building media service client")?;
        Ok(MediaStorage::Remote {
            client,
            upload_url: upload_url.into(),
        })
    }

    pub async fn local(dir: PathBuf, public_base_url: impl Into<String>) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Local media directory: {}", dir.display());
        Ok(MediaStorage::Local {
            dir,
            public_base_url: public_base_url.into(),
        })
    }

    /// Upload a staged file and return its public URL. The staged file is
    /// removed afterwards whether or not the upload succeeded.
    pub async fn upload(&self, local_path: &Path) -> Result<UploadedMedia> {
        let result = match self {
            MediaStorage::Remote { client, upload_url } => {
                upload_remote(client, upload_url, local_path).await
            }
            MediaStorage::Local {
                dir,
                public_base_url,
            } => store_local(dir, public_base_url, local_path).await,
        };

        remove_staged(local_path).await;
        result
    }
}

async fn remove_staged(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove staged upload {}: {}", path.display(), e),
    }
}

async fn upload_remote(
    client: &reqwest::Client,
    upload_url: &str,
    local_path: &Path,
) -> Result<UploadedMedia> {
    let file = fs::File::open(local_path)
        .await
        .with_context(|| format!("opening staged upload {}", local_path.display()))?;
    let len = file.metadata().await?.len();
    let file_name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload")
        .to_string();

    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    let part = reqwest::multipart::Part::stream_with_length(body, len).file_name(file_name);
    let form = reqwest::multipart::Form::new().part("file", part);

    let reply: RemoteUploadResponse = client
        .post(upload_url)
        .multipart(form)
        .send()
        .await
        .context("media service request failed")?
        .error_for_status()
        .context("media service rejected upload")?
        .json()
        .await
        .context("media service returned an unreadable reply")?;

    Ok(UploadedMedia {
        url: reply.secure_url.unwrap_or(reply.url),
    })
}

async fn store_local(
    dir: &Path,
    public_base_url: &str,
    local_path: &Path,
) -> Result<UploadedMedia> {
    let bytes = fs::read(local_path)
        .await
        .with_context(|| format!("reading staged upload {}", local_path.display()))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let name = format!("{}{}", hex::encode(hasher.finalize()), extension_of(local_path));

    let target = dir.join(&name);
    if fs::try_exists(&target).await? {
        info!("Media {} already stored", name);
    } else {
        fs::write(&target, &bytes).await?;
        info!("Stored media {} ({} bytes)", name, bytes.len());
    }

    Ok(UploadedMedia {
        url: format!("{}/{}", public_base_url.trim_end_matches('/'), name),
    })
}

/// A multipart file written to the temporary upload directory.
pub struct StagedFile {
    pub path: PathBuf,
}

impl StagedFile {
    /// Delete the file if a failed request never handed it to `upload`.
    pub async fn discard(&self) {
        remove_staged(&self.path).await;
    }
}

/// Write one multipart file field to a unique path under `tmp_dir`.
pub async fn stage_field(tmp_dir: &Path, field: Field<'_>) -> Result<StagedFile, ApiError> {
    let ext = field.file_name().map(|n| extension_of(Path::new(n))).unwrap_or_default();
    let bytes = field
        .bytes()
        .await
        .map_err(ApiError::from)?;

    if bytes.is_empty() {
        return Err(ApiError::Validation("Uploaded file is empty".into()));
    }
    if bytes.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::Validation("Uploaded file is larger than 10 MB".into()));
    }

    let path = tmp_dir.join(format!("{}{}", Uuid::new_v4(), ext));
    fs::write(&path, &bytes)
        .await
        .with_context(|| format!("staging upload at {}", path.display()))?;
    Ok(StagedFile { path })
}

/// Lower-cased ".ext" of a path if it is a short alphanumeric extension.
fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
