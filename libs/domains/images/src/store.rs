//! Object store backend.
//!
//! This module contains the `StoreBackend` trait and the Cloudinary
//! implementation that uploads processed images.

use crate::error::StoreError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use core_config::{env_or, env_required, ConfigError};
use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Placement of a stored object.
#[derive(Debug, Clone)]
pub struct StoreRequest<'a> {
    /// Object id to assign.
    pub public_id: &'a str,
    /// Folder the object lands in.
    pub folder: &'a str,
    /// Delivery format (e.g. "jpg").
    pub format: &'a str,
}

/// A stored object's identity and public URL.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub public_id: String,
    pub secure_url: String,
}

/// Trait for processed-image store backends.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Store `image` under the requested placement.
    async fn store(
        &self,
        image: &[u8],
        request: &StoreRequest<'_>,
    ) -> Result<StoredImage, StoreError>;

    /// Get the backend name for logging.
    fn name(&self) -> &'static str;
}

const DEFAULT_UPLOAD_FOLDER: &str = "swifty-processed-images";
const DEFAULT_API_URL: &str = "https://api.cloudinary.com/v1_1";

/// Cloudinary API configuration.
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    /// Folder processed images are uploaded to.
    pub upload_folder: String,
    /// API base URL (defaults to production).
    pub api_url: String,
}

impl CloudinaryConfig {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Self {
        Self {
            cloud_name,
            api_key,
            api_secret,
            upload_folder: DEFAULT_UPLOAD_FOLDER.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Requires `CLOUDINARY_CLOUD_NAME`, `CLOUDINARY_API_KEY`, and
    /// `CLOUDINARY_API_SECRET`; `CLOUDINARY_UPLOAD_FOLDER` is an
    /// optional override.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            cloud_name: env_required("CLOUDINARY_CLOUD_NAME")?,
            api_key: env_required("CLOUDINARY_API_KEY")?,
            api_secret: env_required("CLOUDINARY_API_SECRET")?,
            upload_folder: env_or("CLOUDINARY_UPLOAD_FOLDER", DEFAULT_UPLOAD_FOLDER.to_string())?,
            api_url: DEFAULT_API_URL.to_string(),
        })
    }
}

/// Cloudinary store backend.
pub struct CloudinaryUploader {
    config: CloudinaryConfig,
    client: Client,
}

impl CloudinaryUploader {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create an uploader from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(CloudinaryConfig::from_env()?))
    }

    /// The configured upload folder.
    pub fn upload_folder(&self) -> &str {
        &self.config.upload_folder
    }

    /// Sign request parameters: the parameters sorted by name, joined
    /// `key=value` with `&`, with the API secret appended, hashed SHA-256.
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted: Vec<&(&str, &str)> = params.iter().collect();
        sorted.sort_by_key(|(key, _)| *key);

        let joined = sorted
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hasher.update(self.config.api_secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[async_trait]
impl StoreBackend for CloudinaryUploader {
    async fn store(
        &self,
        image: &[u8],
        request: &StoreRequest<'_>,
    ) -> Result<StoredImage, StoreError> {
        let timestamp = Utc::now().timestamp().to_string();

        let signed_params = [
            ("folder", request.folder),
            ("format", request.format),
            ("public_id", request.public_id),
            ("signature_algorithm", "sha256"),
            ("timestamp", timestamp.as_str()),
        ];
        let signature = self.sign(&signed_params);

        let file = format!("data:image/jpeg;base64,{}", BASE64.encode(image));
        let form = [
            ("file", file.as_str()),
            ("api_key", self.config.api_key.as_str()),
            ("folder", request.folder),
            ("format", request.format),
            ("public_id", request.public_id),
            ("signature_algorithm", "sha256"),
            ("timestamp", timestamp.as_str()),
            ("signature", signature.as_str()),
        ];

        let url = format!(
            "{}/{}/image/upload",
            self.config.api_url, self.config.cloud_name
        );

        let response = self.client.post(&url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Response(e.to_string()))?;

        if parsed.secure_url.is_empty() {
            return Err(StoreError::Response("empty secure_url".to_string()));
        }

        debug!(
            public_id = %parsed.public_id,
            secure_url = %parsed.secure_url,
            "Stored processed image"
        );

        Ok(StoredImage {
            public_id: parsed.public_id,
            secure_url: parsed.secure_url,
        })
    }

    fn name(&self) -> &'static str {
        "CloudinaryUploader"
    }
}
