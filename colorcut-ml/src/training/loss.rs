//! Cross-entropy with label smoothing, and its mixed-target form.

use crate::augment::MixedTargets;
use crate::error::MlError;
use crate::tensor;
use burn::nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig};
use burn::prelude::*;

/// Label-smoothed cross-entropy over `[N, K]` logits.
#[derive(Debug)]
pub struct ClassificationLoss<B: Backend> {
    inner: CrossEntropyLoss<B>,
    label_smoothing: f64,
}

impl<B: Backend> ClassificationLoss<B> {
    pub fn new(label_smoothing: f64, device: &B::Device) -> Result<Self, MlError> {
        if !(0.0..1.0).contains(&label_smoothing) {
            return Err(MlError::invalid_input(format!(
                "label_smoothing_eps must be in [0, 1), got {label_smoothing}"
            )));
        }
        let inner = CrossEntropyLossConfig::new()
            .with_smoothing((label_smoothing > 0.0).then_some(label_smoothing as f32))
            .init(device);
        Ok(Self {
            inner,
            label_smoothing,
        })
    }

    pub fn label_smoothing(&self) -> f64 {
        self.label_smoothing
    }

    /// Mean loss against `labels`, as a one-element tensor.
    pub fn forward(&self, logits: Tensor<B, 2>, labels: &[usize]) -> Result<Tensor<B, 1>, MlError> {
        let [n, k] = logits.dims();
        if labels.len() != n {
            return Err(MlError::training(format!(
                "{} labels for {n} logit rows",
                labels.len()
            )));
        }
        if n == 0 {
            return Err(MlError::training("cross-entropy over an empty batch"));
        }
        if let Some(&label) = labels.iter().find(|&&l| l >= k) {
            return Err(MlError::training(format!(
                "label {label} out of range for {k} classes"
            )));
        }
        let targets = tensor::index_tensor::<B>(labels, &logits.device());
        Ok(self.inner.forward(logits, targets))
    }

    /// `w * CE(y) + (1 - w) * CE(y[perm])`, or plain CE when unmixed.
    pub fn forward_mixed(
        &self,
        logits: Tensor<B, 2>,
        targets: &MixedTargets,
    ) -> Result<Tensor<B, 1>, MlError> {
        let Some(secondary) = &targets.secondary else {
            return self.forward(logits, &targets.primary);
        };
        let primary = self.forward(logits.clone(), &targets.primary)?;
        let other = self.forward(logits, &secondary.labels)?;
        let (wa, wb) = (1.0 - secondary.weight, secondary.weight);
        Ok(primary.mul_scalar(wa) + other.mul_scalar(wb))
    }
}
