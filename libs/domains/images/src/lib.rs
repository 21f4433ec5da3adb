//! Image processing domain.
//!
//! Jobs arrive from the partitioned ingress queues, run through the
//! fetch → transform → store pipeline, and leave as `ImageProcessed` or
//! `image.failed` events on the results exchange.

pub mod error;
pub mod events;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod store;
pub mod transform;

pub use error::{PipelineError, StoreError, TransformError};
pub use events::{ImageFailedPayload, ImageOutcomePublisher, ImageProcessedPayload};
pub use fetch::{FetchBackend, HttpFetcher};
pub use models::{ImageJob, ProcessedImage};
pub use pipeline::{ImagePipeline, PIPELINE_PHASES};
pub use queue::ImageProcessingQueue;
pub use store::{CloudinaryConfig, CloudinaryUploader, StoreBackend, StoreRequest, StoredImage};
pub use transform::{GeminiConfig, GeminiTransformer, TransformBackend};
