//! Dataset handling: raw readers, the processed split format, per-image
//! transforms and batching.

pub mod batcher;
pub mod loader;
pub mod preprocess;
pub mod processed;
pub mod raw;
pub mod transform;

pub use batcher::{ImageBatch, ImageBatcher, ImageItem};
pub use loader::{DataLoader, ImageDataset};
pub use preprocess::{PreprocessSummary, run_preprocessing};
pub use processed::{ProcessedSplit, SplitKind};
pub use transform::ImageTransform;
