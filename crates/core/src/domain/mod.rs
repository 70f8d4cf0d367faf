// Domain Layer - Pure pipeline entities

pub mod error;
pub mod image;
pub mod queue;
pub mod stage;
pub mod work_item;

// Re-exports
pub use error::DomainError;
pub use image::{CompressedImage, ImageResultRecord, Quality, ResultKey, DEFAULT_QUALITY};
pub use queue::{QueueSpec, IMAGE_PROCESSING_QUEUE};
pub use stage::PipelineStage;
pub use work_item::{
    decode_task, validate_image_url, ImageTask, ProductId, WireFormat, WorkItem,
    CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT,
};
