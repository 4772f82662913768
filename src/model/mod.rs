mod baby_unet;
mod blocks;
mod unet;

use burn::prelude::*;

pub use baby_unet::{
    BabyUNet, BabyUNetConfig, UUNET_BRANCHES, UUNet, UUNetConfig, tile_outputs,
};
pub use blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
    center_crop,
};
pub use unet::{UNet, UNetConfig};

/// A network mapping images `[batch, channels, height, width]` to per-pixel
/// class log-probabilities `[batch, num_classes, height', width']`.
///
/// Valid-padded networks return a smaller map than their input, and inputs
/// may carry mirrored context around the labelled window.
pub trait SegmentationModel<B: Backend> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Log-probabilities of the centered `size` window, the label window of
    /// the inputs.
    fn forward_window(&self, images: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        center_crop(self.forward(images), size)
    }

    fn num_classes(&self) -> usize;
}

/// Architecture selection for a run.
#[derive(Config, Debug)]
pub enum ModelKind {
    UNet(UNetConfig),
    BabyUNet(BabyUNetConfig),
    UUNet(UUNetConfig),
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::UNet(_) => "UNet",
            ModelKind::BabyUNet(_) => "BabyUNet",
            ModelKind::UUNet(_) => "UUNet",
        }
    }

    /// Output size for an input window (one tile of it for UUNet), `None` when
    /// the network cannot process it.
    pub fn output_shape(&self, input: [usize; 2]) -> Option<[usize; 2]> {
        match self {
            ModelKind::UNet(config) => config.output_shape(input),
            ModelKind::BabyUNet(config) => config.output_shape(input),
            ModelKind::UUNet(config) => config.output_shape(input),
        }
    }

    /// Number of input channels the selected network consumes.
    pub fn input_channels(&self) -> usize {
        match self {
            ModelKind::UNet(config) => config.input_channels,
            ModelKind::BabyUNet(config) => config.input_channels,
            ModelKind::UUNet(_) => UUNET_BRANCHES,
        }
    }
}
