use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use chrono::Utc;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::validation::{is_allowed_image, MAX_IMAGE_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("image hosting is not configured")]
    NotConfigured,
    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct ImageFile {
    pub filename: String,
    pub bytes: Bytes,
}

impl ImageFile {
    pub fn validate(&self) -> Result<(), AppError> {
        if !is_allowed_image(&self.filename) {
            return Err(AppError::bad_request(format!("Invalid file type: {}.", self.filename)));
        }
        if self.bytes.len() > MAX_IMAGE_BYTES {
            return Err(AppError::bad_request(format!("File too large: {}.", self.filename)));
        }
        Ok(())
    }
}

/// A multipart body split into its optional `data` JSON text and named file parts.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub data: Option<String>,
    files: Vec<(String, ImageFile)>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let filename = field.file_name().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {}", e)))?;
            match filename {
                // Browsers send an empty part when no file was picked.
                Some(filename) if !filename.is_empty() => {
                    form.files.push((name, ImageFile { filename, bytes }));
                }
                Some(_) => {}
                None if name == "data" => {
                    form.data = Some(String::from_utf8_lossy(&bytes).into_owned());
                }
                None => {}
            }
        }
        Ok(form)
    }

    /// Reads a request already known to be multipart, mapping rejections to the error envelope.
    pub async fn from_request<S: Send + Sync>(request: Request, state: &S) -> Result<Self, AppError> {
        let multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| AppError::bad_request(format!("Invalid multipart body: {}", e)))?;
        Self::read(multipart).await
    }

    pub fn files(&self, field: &str) -> Vec<ImageFile> {
        self.files
            .iter()
            .filter(|(name, _)| name == field)
            .map(|(_, file)| file.clone())
            .collect()
    }

    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<Option<T>, AppError> {
        self.data
            .as_deref()
            .map(|raw| {
                serde_json::from_str(raw)
                    .map_err(|_| AppError::bad_request("Invalid JSON in 'data' field"))
            })
            .transpose()
    }
}

pub fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"))
}

#[derive(Debug, Clone)]
struct CloudinaryCredentials {
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Client for the hosted image store (Cloudinary's signed upload API).
#[derive(Clone)]
pub struct ImageHost {
    client: reqwest::Client,
    credentials: Option<CloudinaryCredentials>,
}

impl ImageHost {
    pub fn new(config: &AppConfig) -> Self {
        let credentials = match (
            &config.cloudinary_cloud_name,
            &config.cloudinary_api_key,
            &config.cloudinary_api_secret,
        ) {
            (Some(cloud_name), Some(api_key), Some(api_secret)) => Some(CloudinaryCredentials {
                cloud_name: cloud_name.clone(),
                api_key: api_key.clone(),
                api_secret: api_secret.clone(),
            }),
            _ => {
                log::warn!("Cloudinary credentials not configured; image uploads will fail");
                None
            }
        };
        Self {
            client: reqwest::Client::new(),
            credentials,
        }
    }

    pub async fn upload(&self, file: &ImageFile) -> Result<String, MediaError> {
        let creds = self.credentials.as_ref().ok_or(MediaError::NotConfigured)?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_upload(&[("timestamp", timestamp.as_str())], &creds.api_secret);

        let part = reqwest::multipart::Part::bytes(file.bytes.to_vec()).file_name(file.filename.clone());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", creds.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            creds.cloud_name
        );
        let uploaded: UploadResponse = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        log::info!("Uploaded {} to {}", file.filename, uploaded.secure_url);
        Ok(uploaded.secure_url)
    }

    /// Validates every file first so a bad one uploads nothing, then uploads in order.
    pub async fn upload_all(&self, files: &[ImageFile]) -> Result<Vec<String>, AppError> {
        for file in files {
            file.validate()?;
        }
        let mut urls = Vec::with_capacity(files.len());
        for file in files {
            let url = self
                .upload(file)
                .await
                .map_err(|e| AppError::Internal(format!("Image upload failed: {}", e)))?;
            urls.push(url);
        }
        Ok(urls)
    }
}

/// SHA-1 over the alphabetically sorted `key=value` pairs joined by `&`, followed by the secret.
fn sign_upload(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}
