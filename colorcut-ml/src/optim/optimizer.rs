//! Optimizers over [`ClassificationModel`] parameters.
//!
//! SGD uses momentum 0.9 without dampening, Adam applies weight decay as an
//! L2 term on the gradient and AdamW decouples it. The learning rate is
//! supplied on every step so the scheduler stays independent of the
//! optimizer state.

use crate::error::MlError;
use crate::model::ClassificationModel;
use crate::types::OptimizerType;
use burn::grad_clipping::GradientClippingConfig;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{
    Adam, AdamConfig, AdamW, AdamWConfig, GradientsParams, Optimizer, Sgd, SgdConfig,
};
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder, RecorderError};
use burn::tensor::backend::AutodiffBackend;

pub const SGD_MOMENTUM: f64 = 0.9;
pub const ADAM_EPSILON: f32 = 1e-8;

type Adaptor<O, B> = OptimizerAdaptor<O, ClassificationModel<B>, B>;
type StateRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// One of the supported optimizers, holding its per-parameter state.
pub enum ModelOptimizer<B: AutodiffBackend> {
    Sgd(Adaptor<Sgd<B::InnerBackend>, B>),
    Adam(Adaptor<Adam, B>),
    AdamW(Adaptor<AdamW, B>),
}

impl<B: AutodiffBackend> ModelOptimizer<B> {
    /// `clip_grad_norm <= 0` disables clipping; otherwise every parameter
    /// gradient is rescaled to at most that L2 norm.
    pub fn new(kind: OptimizerType, weight_decay: f64, clip_grad_norm: f64) -> Result<Self, MlError> {
        if !(weight_decay >= 0.0 && weight_decay.is_finite()) {
            return Err(MlError::invalid_input(format!(
                "weight_decay must be non-negative, got {weight_decay}"
            )));
        }
        let clipping = (clip_grad_norm > 0.0).then_some(GradientClippingConfig::Norm(clip_grad_norm as f32));
        let decay = (weight_decay > 0.0).then(|| WeightDecayConfig::new(weight_decay as f32));

        Ok(match kind {
            OptimizerType::Sgd => Self::Sgd(
                SgdConfig::new()
                    .with_momentum(Some(
                        MomentumConfig::new()
                            .with_momentum(SGD_MOMENTUM)
                            .with_dampening(0.0),
                    ))
                    .with_weight_decay(decay)
                    .with_gradient_clipping(clipping)
                    .init(),
            ),
            OptimizerType::Adam => Self::Adam(
                AdamConfig::new()
                    .with_epsilon(ADAM_EPSILON)
                    .with_weight_decay(decay)
                    .with_grad_clipping(clipping)
                    .init(),
            ),
            OptimizerType::AdamW => Self::AdamW(
                AdamWConfig::new()
                    .with_epsilon(ADAM_EPSILON)
                    .with_weight_decay(weight_decay as f32)
                    .with_grad_clipping(clipping)
                    .init(),
            ),
        })
    }

    pub fn kind(&self) -> OptimizerType {
        match self {
            Self::Sgd(_) => OptimizerType::Sgd,
            Self::Adam(_) => OptimizerType::Adam,
            Self::AdamW(_) => OptimizerType::AdamW,
        }
    }

    /// Apply one update with learning rate `lr`.
    pub fn step(
        &mut self,
        lr: f64,
        model: ClassificationModel<B>,
        grads: GradientsParams,
    ) -> ClassificationModel<B> {
        match self {
            Self::Sgd(optim) => optim.step(lr, model, grads),
            Self::Adam(optim) => optim.step(lr, model, grads),
            Self::AdamW(optim) => optim.step(lr, model, grads),
        }
    }

    /// Serialize the per-parameter state (momentum buffers, moments).
    pub fn to_bytes(&self) -> Result<Vec<u8>, MlError> {
        let recorder = StateRecorder::default();
        let bytes = match self {
            Self::Sgd(optim) => <StateRecorder as Recorder<B>>::record(&recorder, optim.to_record(), ()),
            Self::Adam(optim) => <StateRecorder as Recorder<B>>::record(&recorder, optim.to_record(), ()),
            Self::AdamW(optim) => <StateRecorder as Recorder<B>>::record(&recorder, optim.to_record(), ()),
        };
        bytes.map_err(|e| MlError::checkpoint(format!("cannot encode optimizer state: {e}")))
    }

    /// Restore state written by [`Self::to_bytes`] for the same optimizer kind.
    pub fn load_bytes(self, bytes: Vec<u8>, device: &B::Device) -> Result<Self, MlError> {
        let recorder = StateRecorder::default();
        let decode = |e: RecorderError| MlError::checkpoint(format!("cannot decode optimizer state: {e}"));
        Ok(match self {
            Self::Sgd(optim) => {
                let record = <StateRecorder as Recorder<B>>::load(&recorder, bytes, device).map_err(decode)?;
                Self::Sgd(optim.load_record(record))
            }
            Self::Adam(optim) => {
                let record = <StateRecorder as Recorder<B>>::load(&recorder, bytes, device).map_err(decode)?;
                Self::Adam(optim.load_record(record))
            }
            Self::AdamW(optim) => {
                let record = <StateRecorder as Recorder<B>>::load(&recorder, bytes, device).map_err(decode)?;
                Self::AdamW(optim.load_record(record))
            }
        })
    }
}
