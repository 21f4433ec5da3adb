//! AI transform backend.
//!
//! This module contains the `TransformBackend` trait and the Gemini
//! implementation that restyles images through `generateContent`.

use crate::error::TransformError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use core_config::{env_or, env_required, ConfigError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trait for image transform backends.
#[async_trait]
pub trait TransformBackend: Send + Sync {
    /// Transform `image` according to `style`.
    ///
    /// `Ok(None)` means the backend answered without an image payload;
    /// the pipeline stores the original bytes in that case.
    async fn transform(&self, image: &[u8], style: &str)
        -> Result<Option<Vec<u8>>, TransformError>;

    /// Get the backend name for logging.
    fn name(&self) -> &'static str;
}

const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key.
    pub api_key: String,
    /// Model used for image generation.
    pub model: String,
    /// API base URL (defaults to production).
    pub api_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Requires `GEMINI_API_KEY`; `GEMINI_MODEL` and `GEMINI_API_URL`
    /// are optional overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: env_required("GEMINI_API_KEY")?,
            model: env_or("GEMINI_MODEL", DEFAULT_MODEL.to_string())?,
            api_url: env_or("GEMINI_API_URL", DEFAULT_API_URL.to_string())?,
        })
    }
}

/// Gemini image transform backend.
pub struct GeminiTransformer {
    config: GeminiConfig,
    client: Client,
}

impl GeminiTransformer {
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a transformer from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(GeminiConfig::from_env()?))
    }

    fn prompt(style: &str) -> String {
        format!(
            "Transform this image into the '{}' style. \
             Keep the subject and composition, restyle everything else. \
             Return only the transformed image.",
            style
        )
    }
}

// Gemini API request/response structures

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

/// Keep error bodies loggable without dumping whole responses.
fn truncate_body(body: String) -> String {
    const MAX: usize = 300;
    if body.len() > MAX {
        format!("{}...", &body[..MAX])
    } else {
        body
    }
}

#[async_trait]
impl TransformBackend for GeminiTransformer {
    async fn transform(
        &self,
        image: &[u8],
        style: &str,
    ) -> Result<Option<Vec<u8>>, TransformError> {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart {
                        text: Some(Self::prompt(style)),
                        inline_data: None,
                    },
                    RequestPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(image),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url, self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::RateLimited(truncate_body(body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransformError::Api {
                status: status.as_u16(),
                message: truncate_body(body),
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;

        for candidate in parsed.candidates {
            let Some(content) = candidate.content else {
                continue;
            };
            for part in content.parts {
                if let Some(inline) = part.inline_data {
                    let bytes = BASE64
                        .decode(inline.data.as_bytes())
                        .map_err(|e| TransformError::InvalidPayload(e.to_string()))?;
                    debug!(
                        style = style,
                        mime_type = %inline.mime_type,
                        bytes = bytes.len(),
                        "Transform returned an image"
                    );
                    return Ok(Some(bytes));
                }
            }
        }

        // Text-only answer: the caller passes the original image through.
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "GeminiTransformer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        temp_env::with_vars(
            [
                ("GEMINI_API_KEY", Some("key-123")),
                ("GEMINI_MODEL", Some("gemini-test")),
                ("GEMINI_API_URL", None),
            ],
            || {
                let config = GeminiConfig::from_env().unwrap();
                assert_eq!(config.api_key, "key-123");
                assert_eq!(config.model, "gemini-test");
                assert_eq!(
                    config.api_url,
                    "https://generativelanguage.googleapis.com/v1beta"
                );
            },
        );
    }

    #[test]
    fn test_config_requires_api_key() {
        temp_env::with_var_unset("GEMINI_API_KEY", || {
            let result = GeminiConfig::from_env();
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("GEMINI_API_KEY"));
        });
    }

    #[test]
    fn test_prompt_includes_style() {
        let prompt = GeminiTransformer::prompt("anime");
        assert!(prompt.contains("'anime'"));
    }

    #[test]
    fn test_request_wire_shape() {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart {
                        text: Some("prompt".to_string()),
                        inline_data: None,
                    },
                    RequestPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/jpeg".to_string(),
                            data: BASE64.encode(b"img"),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "prompt");
        assert_eq!(
            json["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
        // No null placeholders on the wire
        assert!(json["contents"][0]["parts"][0].get("inlineData").is_none());
    }

    #[test]
    fn test_response_image_part_decodes() {
        let raw = format!(
            r#"{{"candidates": [{{"content": {{"parts": [
                {{"text": "here you go"}},
                {{"inlineData": {{"mimeType": "image/png", "data": "{}"}}}}
            ]}}}}]}}"#,
            BASE64.encode(b"result-bytes")
        );

        let parsed: GenerateContentResponse = serde_json::from_str(&raw).unwrap();
        let inline = parsed.candidates[0]
            .content
            .as_ref()
            .unwrap()
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .unwrap();
        assert_eq!(BASE64.decode(&inline.data).unwrap(), b"result-bytes");
    }

    #[test]
    fn test_response_without_image_parses_as_empty() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let has_image = parsed
            .candidates
            .iter()
            .flat_map(|c| c.content.iter())
            .flat_map(|c| c.parts.iter())
            .any(|p| p.inline_data.is_some());
        assert!(!has_image);
    }

    #[test]
    fn test_truncate_body() {
        let short = truncate_body("short".to_string());
        assert_eq!(short, "short");

        let long = truncate_body("x".repeat(500));
        assert_eq!(long.len(), 303);
        assert!(long.ends_with("..."));
    }
}
