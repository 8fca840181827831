//! Training infrastructure: loss, metrics, callbacks, checkpoints and the
//! training/testing jobs.

pub mod callbacks;
pub mod checkpoint;
pub mod loss;
pub mod metrics;
pub mod reproducibility;
pub mod testing;
pub mod trainer;

pub use checkpoint::{CHECKPOINT_FILE, Checkpoint};
pub use loss::ClassificationLoss;
pub use metrics::{ClassificationMetrics, TrainingMetrics};
pub use testing::{TestResult, run_testing};
pub use trainer::{TrainingSummary, run_training};
