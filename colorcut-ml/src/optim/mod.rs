//! Optimizers, gradient clipping and learning-rate schedules.

pub mod optimizer;
pub mod scheduler;

pub use optimizer::ModelOptimizer;
pub use scheduler::LrScheduler;
