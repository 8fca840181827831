//! Backend and device selection.
//!
//! Training runs on the `burn` NdArray CPU backend wrapped in `Autodiff`.
//! Accelerator requests are honoured by falling back to the CPU device with
//! a warning so the same command lines work on any machine.

use burn::backend::ndarray::NdArrayDevice;

/// Backend used for evaluation and inference.
pub type InnerBackend = burn::backend::NdArray<f32>;

/// Backend used for training, with autodiff support.
pub type TrainBackend = burn::backend::Autodiff<InnerBackend>;

/// The device type corresponding to the backend.
pub type Device = NdArrayDevice;

/// Held by tests that seed or draw from the backend's global generator.
#[cfg(test)]
pub(crate) static SEED_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Map a device string such as `cuda:0`, `mps` or `cpu` to a usable device.
pub fn resolve_device(requested: &str) -> Device {
    let lower = requested.to_ascii_lowercase();
    if lower.contains("cuda") {
        tracing::warn!(requested, "No GPU backend built in, using NdArray CPU device");
    } else if lower.contains("mps") {
        tracing::warn!(requested, "No MPS backend built in, using NdArray CPU device");
    } else if !lower.contains("cpu") {
        tracing::warn!(requested, "Unknown device, using NdArray CPU device");
    }
    let device = NdArrayDevice::Cpu;
    tracing::debug!(?device, "Device initialized");
    device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_request_resolves_to_cpu() {
        for requested in ["cuda", "cuda:1", "mps", "cpu", "tpu", ""] {
            assert_eq!(resolve_device(requested), NdArrayDevice::Cpu);
        }
    }
}
