//! Data models for the image processing domain.

use bus_worker::QueueJob;
use serde::{Deserialize, Serialize};

/// An image transformation job, as carried in the ingress event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageJob {
    /// Unique id of the logical work item.
    pub image_id: String,
    /// Owning user, passed through to outcome events.
    pub user_id: String,
    /// Where to fetch the source image from.
    pub original_image_url: String,
    /// Requested transform style tag; also part of the transform prompt.
    pub style: String,
}

impl QueueJob for ImageJob {
    fn job_id(&self) -> String {
        self.image_id.clone()
    }
}

/// The result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    /// Object id assigned in the store backend.
    pub public_id: String,
    /// Public URL of the stored image.
    pub processed_url: String,
    /// Whether the original bytes were stored because the transform
    /// returned no image.
    pub passed_through: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_job_wire_names() {
        let raw = r#"{
            "imageId": "i1",
            "userId": "u1",
            "originalImageUrl": "https://x/i1.jpg",
            "style": "anime"
        }"#;

        let job: ImageJob = serde_json::from_str(raw).unwrap();
        assert_eq!(job.image_id, "i1");
        assert_eq!(job.user_id, "u1");
        assert_eq!(job.original_image_url, "https://x/i1.jpg");
        assert_eq!(job.style, "anime");
        assert_eq!(job.job_id(), "i1");

        let json = serde_json::to_value(&job).unwrap();
        assert!(json.get("imageId").is_some());
        assert!(json.get("originalImageUrl").is_some());
    }

    #[test]
    fn test_image_job_rejects_missing_fields() {
        let raw = r#"{ "imageId": "i1" }"#;
        let result: Result<ImageJob, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }
}
