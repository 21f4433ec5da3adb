//! The image processing pipeline.
//!
//! Runs the three stages strictly in order for each job:
//!
//! 1. **fetch** - download the source image
//! 2. **transform** - restyle it through the AI backend, with an inner
//!    retry loop around retryable backend faults
//! 3. **store** - upload the result (or the original, if the transform
//!    returned no image)
//!
//! Each stage's elapsed time is recorded on the attempt's phase recorder
//! as soon as the stage completes, so a deadline expiry still knows which
//! phase died.

use crate::error::{PipelineError, TransformError};
use crate::fetch::FetchBackend;
use crate::models::{ImageJob, ProcessedImage};
use crate::store::{StoreBackend, StoreRequest};
use crate::transform::TransformBackend;
use async_trait::async_trait;
use bus_worker::{metrics, JobContext, JobProcessor, WorkerError};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Pipeline phases in execution order.
pub const PIPELINE_PHASES: &[&str] = &["fetch", "transform", "store"];

/// The fetch → transform → store pipeline.
pub struct ImagePipeline<F, T, S>
where
    F: FetchBackend,
    T: TransformBackend,
    S: StoreBackend,
{
    fetcher: Arc<F>,
    transform: Arc<T>,
    store: Arc<S>,
    /// Retry cap for the inner transform retry loop; the first attempt
    /// does not count against it.
    inner_retry_cap: u32,
    /// Folder processed images are stored in.
    upload_folder: String,
}

impl<F, T, S> ImagePipeline<F, T, S>
where
    F: FetchBackend,
    T: TransformBackend,
    S: StoreBackend,
{
    /// Create a new pipeline.
    pub fn new(fetcher: F, transform: T, store: S) -> Self {
        Self::with_arcs(Arc::new(fetcher), Arc::new(transform), Arc::new(store))
    }

    /// Create a new pipeline from Arc-wrapped backends.
    pub fn with_arcs(fetcher: Arc<F>, transform: Arc<T>, store: Arc<S>) -> Self {
        Self {
            fetcher,
            transform,
            store,
            inner_retry_cap: 5,
            upload_folder: "swifty-processed-images".to_string(),
        }
    }

    /// Set the inner transform retry cap.
    pub fn with_inner_retry_cap(mut self, cap: u32) -> Self {
        self.inner_retry_cap = cap;
        self
    }

    /// Set the upload folder.
    pub fn with_upload_folder(mut self, folder: impl Into<String>) -> Self {
        self.upload_folder = folder.into();
        self
    }

    /// Call the transform backend, sleeping `2^k` seconds after the k-th
    /// retryable failure, for up to `inner_retry_cap` retries after the
    /// first attempt. Non-retryable faults and an exhausted cap surface
    /// the last error.
    async fn transform_with_retry(
        &self,
        image: &[u8],
        style: &str,
    ) -> Result<Option<Vec<u8>>, TransformError> {
        let mut attempt: u32 = 1;
        loop {
            match self.transform.transform(image, style).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt <= self.inner_retry_cap => {
                    let backoff_secs = 2u64.saturating_pow(attempt);
                    warn!(
                        attempt = attempt,
                        cap = self.inner_retry_cap,
                        backoff_secs = backoff_secs,
                        error = %e,
                        "Transform attempt failed, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<F, T, S> JobProcessor<ImageJob> for ImagePipeline<F, T, S>
where
    F: FetchBackend + 'static,
    T: TransformBackend + 'static,
    S: StoreBackend + 'static,
{
    type Output = ProcessedImage;

    async fn process(
        &self,
        job: &ImageJob,
        ctx: &JobContext,
    ) -> Result<ProcessedImage, WorkerError> {
        let fetch_started = Instant::now();
        let original = self.fetcher.fetch(&job.original_image_url).await?;
        ctx.timings
            .record("fetch", fetch_started.elapsed().as_millis() as u64);

        info!(
            job_id = %job.image_id,
            bytes = original.len(),
            "Fetched source image"
        );

        let transform_started = Instant::now();
        let transformed = self
            .transform_with_retry(&original, &job.style)
            .await
            .map_err(PipelineError::from)?;
        ctx.timings
            .record("transform", transform_started.elapsed().as_millis() as u64);

        let (processed, passed_through) = match transformed {
            Some(bytes) => (bytes, false),
            None => {
                warn!(
                    job_id = %job.image_id,
                    style = %job.style,
                    "Transform returned no image, storing original"
                );
                metrics::record_pass_through();
                (original, true)
            }
        };

        let store_started = Instant::now();
        let public_id = format!("processed_{}_{}", job.image_id, Utc::now().timestamp_millis());
        let stored = self
            .store
            .store(
                &processed,
                &StoreRequest {
                    public_id: &public_id,
                    folder: &self.upload_folder,
                    format: "jpg",
                },
            )
            .await
            .map_err(PipelineError::from)?;
        ctx.timings
            .record("store", store_started.elapsed().as_millis() as u64);

        Ok(ProcessedImage {
            public_id: stored.public_id,
            processed_url: stored.secure_url,
            passed_through,
        })
    }

    fn name(&self) -> &'static str {
        "ImagePipeline"
    }

    fn phases(&self) -> &'static [&'static str] {
        PIPELINE_PHASES
    }
}
