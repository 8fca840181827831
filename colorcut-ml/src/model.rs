//! Image classifiers built from `burn` modules.
//!
//! Each [`ModelType`] selects a small CPU-sized backbone from the family its
//! name refers to: a residual CNN, an inverted-residual CNN with depthwise
//! convolutions, or a patch-embedding transformer encoder. All of them end in
//! global pooling and a linear head over `num_classes` logits.

use crate::error::MlError;
use crate::types::ModelType;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::transformer::{TransformerEncoder, TransformerEncoderConfig, TransformerEncoderInput};
use burn::nn::{BatchNorm, BatchNormConfig, Embedding, EmbeddingConfig, Linear, LinearConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Architecture of a [`ClassificationModel`]. Stored next to the weights so
/// a checkpoint can rebuild the module before loading its record.
#[derive(Config, Debug, PartialEq)]
pub struct ModelConfig {
    pub model_type: ModelType,
    pub num_classes: usize,
    pub channels: usize,
    /// Side of the square input images.
    pub image_size: usize,
    /// Channels of the first stage; later stages double it.
    #[config(default = 16)]
    pub width: usize,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), MlError> {
        if self.num_classes == 0 {
            return Err(MlError::model("a classifier needs at least one class"));
        }
        if self.channels == 0 || self.width == 0 {
            return Err(MlError::model("channels and width must be positive"));
        }
        if self.image_size < 4 {
            return Err(MlError::model(format!(
                "{} needs inputs of at least 4x4, got {}x{}",
                self.model_type, self.image_size, self.image_size
            )));
        }
        Ok(())
    }

    /// Build a freshly initialised model on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ClassificationModel<B>, MlError> {
        self.validate()?;
        let backbone = match self.model_type {
            ModelType::Resnet50 => Backbone::Residual(ResidualNet::new(self.channels, self.width, device)),
            ModelType::EfficientnetB0 => {
                Backbone::InvertedResidual(InvertedResidualNet::new(self.channels, self.width, device))
            }
            ModelType::VitB16 => Backbone::PatchTransformer(PatchTransformer::new(
                self.channels,
                self.width * 2,
                self.image_size,
                device,
            )),
        };
        let head = LinearConfig::new(self.width * 2, self.num_classes).init(device);
        let model = ClassificationModel {
            backbone,
            head,
            channels: self.channels,
            image_size: self.image_size,
        };
        tracing::debug!(
            model = %self.model_type,
            params = model.num_params(),
            "Initialised classifier"
        );
        Ok(model)
    }
}

#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    Residual(ResidualNet<B>),
    InvertedResidual(InvertedResidualNet<B>),
    PatchTransformer(PatchTransformer<B>),
}

impl<B: Backend> Backbone<B> {
    /// `[N, C, H, W]` -> `[N, features]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::Residual(net) => net.forward(images),
            Backbone::InvertedResidual(net) => net.forward(images),
            Backbone::PatchTransformer(net) => net.forward(images),
        }
    }
}

#[derive(Module, Debug)]
pub struct ClassificationModel<B: Backend> {
    backbone: Backbone<B>,
    head: Linear<B>,
    channels: usize,
    image_size: usize,
}

impl<B: Backend> ClassificationModel<B> {
    /// Reject batches the backbone was not built for.
    pub fn check_input(&self, dims: [usize; 4]) -> Result<(), MlError> {
        let [_, c, h, w] = dims;
        let expected = [self.channels, self.image_size, self.image_size];
        if [c, h, w] != expected {
            return Err(MlError::model(format!(
                "expected {expected:?} inputs, got {:?}",
                [c, h, w]
            )));
        }
        Ok(())
    }

    /// `[N, C, H, W]` -> logits `[N, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    groups: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
        .with_groups(groups)
        .with_bias(false)
        .init(device)
}

/// Conv, batch norm, optional ReLU.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
    activate: bool,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        groups: usize,
        activate: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv(channels, kernel, stride, groups, device),
            bn: BatchNormConfig::new(channels[1]).init(device),
            activate,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        if self.activate { relu(x) } else { x }
    }
}

/// Two 3x3 convolutions with an identity (or 1x1 projected) shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    downsample: Option<ConvBn<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new([in_channels, out_channels], 1, stride, 1, false, device));
        Self {
            conv1: ConvBn::new([in_channels, out_channels], 3, stride, 1, true, device),
            conv2: ConvBn::new([out_channels, out_channels], 3, 1, 1, false, device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.forward(x.clone()),
            None => x.clone(),
        };
        relu(self.conv2.forward(self.conv1.forward(x)) + identity)
    }
}

/// ResNet-style network: stem, two residual stages, global average pool.
#[derive(Module, Debug)]
pub struct ResidualNet<B: Backend> {
    stem: ConvBn<B>,
    stage1: BasicBlock<B>,
    stage2: BasicBlock<B>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResidualNet<B> {
    fn new(channels: usize, width: usize, device: &B::Device) -> Self {
        Self {
            stem: ConvBn::new([channels, width], 3, 1, 1, true, device),
            stage1: BasicBlock::new(width, width, 1, device),
            stage2: BasicBlock::new(width, width * 2, 2, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.stage2.forward(self.stage1.forward(self.stem.forward(x)));
        self.pool.forward(x).flatten(1, 3)
    }
}

/// Expand, depthwise, project. The shortcut is kept only when the block
/// preserves both stride and width.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: ConvBn<B>,
    depthwise: ConvBn<B>,
    project: ConvBn<B>,
    residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expansion: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expansion;
        Self {
            expand: ConvBn::new([in_channels, hidden], 1, 1, 1, true, device),
            depthwise: ConvBn::new([hidden, hidden], 3, stride, hidden, true, device),
            project: ConvBn::new([hidden, out_channels], 1, 1, 1, false, device),
            residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self
            .project
            .forward(self.depthwise.forward(self.expand.forward(x.clone())));
        if self.residual { out + x } else { out }
    }
}

/// EfficientNet/MobileNet-style network of inverted-residual blocks.
#[derive(Module, Debug)]
pub struct InvertedResidualNet<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<InvertedResidual<B>>,
    pool: AdaptiveAvgPool2d,
}

impl<B: Backend> InvertedResidualNet<B> {
    fn new(channels: usize, width: usize, device: &B::Device) -> Self {
        Self {
            stem: ConvBn::new([channels, width], 3, 1, 1, true, device),
            blocks: vec![
                InvertedResidual::new(width, width, 4, 1, device),
                InvertedResidual::new(width, width * 2, 4, 2, device),
                InvertedResidual::new(width * 2, width * 2, 4, 1, device),
            ],
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(self.stem.forward(x), |x, block| block.forward(x));
        self.pool.forward(x).flatten(1, 3)
    }
}

/// ViT-style network: strided patch embedding, learned positions, a
/// pre-norm transformer encoder and mean pooling over the tokens.
#[derive(Module, Debug)]
pub struct PatchTransformer<B: Backend> {
    patch_embed: Conv2d<B>,
    positions: Embedding<B>,
    encoder: TransformerEncoder<B>,
}

const PATCH_GRID: usize = 4;
const TRANSFORMER_HEADS: usize = 2;
const TRANSFORMER_LAYERS: usize = 2;

impl<B: Backend> PatchTransformer<B> {
    fn new(channels: usize, d_model: usize, image_size: usize, device: &B::Device) -> Self {
        // At most a 4x4 grid of patches whatever the input size.
        let patch = image_size.div_ceil(PATCH_GRID);
        Self {
            patch_embed: Conv2dConfig::new([channels, d_model], [patch, patch])
                .with_stride([patch, patch])
                .init(device),
            positions: EmbeddingConfig::new(PATCH_GRID * PATCH_GRID, d_model).init(device),
            encoder: TransformerEncoderConfig::new(d_model, d_model * 2, TRANSFORMER_HEADS, TRANSFORMER_LAYERS)
                .with_dropout(0.0)
                .with_norm_first(true)
                .init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let patches = self.patch_embed.forward(x);
        let [n, d, gh, gw] = patches.dims();
        let tokens = patches.reshape([n, d, gh * gw]).swap_dims(1, 2);

        let device = tokens.device();
        let ids = Tensor::<B, 1, Int>::arange(0..(gh * gw) as i64, &device)
            .unsqueeze::<2>()
            .expand([n, gh * gw]);
        let tokens = tokens + self.positions.forward(ids);

        let encoded = self.encoder.forward(TransformerEncoderInput::new(tokens));
        encoded.mean_dim(1).reshape([n, d])
    }
}
