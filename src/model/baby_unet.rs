use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Relu,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
    tensor::activation::log_softmax,
};

use nn::PaddingConfig2d;

use super::SegmentationModel;
use super::blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
    center_crop, padding_per_axis, u_shape_side,
};

/// Three-level U-Net with batch-normalised blocks.
///
/// With `Valid` padding the output is smaller than the input and skip
/// features are center-cropped before concatenation. The last block emits
/// `num_classes` feature maps without a softmax, so the network can be
/// used either standalone or as a branch of [UUNet].
#[derive(Module, Debug)]
pub struct BabyUNet<B: Backend> {
    encoder_block_1: EncoderBlock<B>,
    encoder_block_2: EncoderBlock<B>,
    encoder_block_3: EncoderBlock<B>,
    middle: ConvBlock<B>,
    decoder_block_3: DecoderBlock<B>,
    decoder_block_2: DecoderBlock<B>,
    decoder_block_1: DecoderBlock<B>,

    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct BabyUNetConfig {
    pub input_channels: usize,
    num_classes: usize,
    /// Every filter count is divided by this factor.
    #[config(default = "1")]
    reduction: usize,
    #[config(default = "PaddingConfig2d::Valid")]
    padding: PaddingConfig2d,
}

impl BabyUNetConfig {
    /// Output size for a `[rows, cols]` input, `None` when the input is too
    /// small for three levels or pools an odd side.
    pub fn output_shape(&self, input: [usize; 2]) -> Option<[usize; 2]> {
        let [pad_rows, pad_cols] = padding_per_axis(&self.padding);
        Some([
            u_shape_side(input[0], 3, pad_rows)?,
            u_shape_side(input[1], 3, pad_cols)?,
        ])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> BabyUNet<B> {
        let f = |filters: usize| (filters / self.reduction).max(1);
        let conv_block = |input, filters| {
            ConvBlockConfig::new(input, filters)
                .with_dropout(0.0)
                .with_batch_norm(true)
                .with_padding(self.padding.clone())
        };

        BabyUNet {
            encoder_block_1: EncoderBlockConfig::new(conv_block(self.input_channels, f(64)))
                .init(device),
            encoder_block_2: EncoderBlockConfig::new(conv_block(f(64), f(128))).init(device),
            encoder_block_3: EncoderBlockConfig::new(conv_block(f(128), f(256))).init(device),
            middle: conv_block(f(256), f(512)).init(device),
            decoder_block_3: DecoderBlockConfig::new(
                f(512),
                f(256),
                conv_block(f(512), f(256)),
            )
            .init(device),
            decoder_block_2: DecoderBlockConfig::new(
                f(256),
                f(128),
                conv_block(f(256), f(128)),
            )
            .init(device),
            decoder_block_1: DecoderBlockConfig::new(
                f(128),
                f(64),
                conv_block(f(128), self.num_classes).with_middle_channels(Some(f(64))),
            )
            .init(device),
            num_classes: self.num_classes,
        }
    }
}

impl<B: Backend> BabyUNet<B> {
    /// Raw class scores, before any softmax.
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let (x, skip_1) = self.encoder_block_1.forward(x);
        let (x, skip_2) = self.encoder_block_2.forward(x);
        let (x, skip_3) = self.encoder_block_3.forward(x);

        let x = self.middle.forward(x);

        let x = self.decoder_block_3.forward(x, skip_3);
        let x = self.decoder_block_2.forward(x, skip_2);

        self.decoder_block_1.forward(x, skip_1)
    }
}

impl<B: Backend> SegmentationModel<B> for BabyUNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        log_softmax(self.features(images), 1)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Nine [BabyUNet] branches, one per input channel, whose outputs are tiled
/// on a 3x3 grid and refined by two convolutions.
///
/// Channel `k` of the input feeds branch `k`; branch outputs are laid out
/// row-major, so branches 0, 1 and 2 form the top row.
#[derive(Module, Debug)]
pub struct UUNet<B: Backend> {
    branches: Vec<BabyUNet<B>>,
    clean_1: Conv2d<B>,
    norm_1: BatchNorm<B, 2>,
    clean_2: Conv2d<B>,
    norm_2: BatchNorm<B, 2>,
    out: Conv2d<B>,
    activation: Relu,

    num_classes: usize,
}

pub const UUNET_BRANCHES: usize = 9;
const BRANCH_FEATURES: usize = 32;

#[derive(Config, Debug)]
pub struct UUNetConfig {
    num_classes: usize,
    #[config(default = "1")]
    reduction: usize,
    #[config(default = "PaddingConfig2d::Valid")]
    padding: PaddingConfig2d,
}

impl UUNetConfig {
    /// Output size of one branch for a `[rows, cols]` input tile.
    pub fn output_shape(&self, tile: [usize; 2]) -> Option<[usize; 2]> {
        BabyUNetConfig::new(1, BRANCH_FEATURES)
            .with_padding(self.padding.clone())
            .output_shape(tile)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UUNet<B> {
        let branches = (0..UUNET_BRANCHES)
            .map(|_| {
                BabyUNetConfig::new(1, BRANCH_FEATURES)
                    .with_reduction(self.reduction)
                    .with_padding(self.padding.clone())
                    .init(device)
            })
            .collect();

        UUNet {
            branches,
            clean_1: Conv2dConfig::new([BRANCH_FEATURES, 64], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm_1: BatchNormConfig::new(64).init(device),
            clean_2: Conv2dConfig::new([64, BRANCH_FEATURES], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(device),
            norm_2: BatchNormConfig::new(BRANCH_FEATURES).init(device),
            out: Conv2dConfig::new([BRANCH_FEATURES, self.num_classes], [1, 1]).init(device),
            activation: Relu::new(),
            num_classes: self.num_classes,
        }
    }
}

impl<B: Backend> UUNet<B> {
    /// Log-probabilities with every branch output kept whole.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let outputs = self.branch_outputs(images);
        let [_, _, rows, cols] = outputs[0].dims();

        self.refine(tile_outputs(outputs, [rows, cols]))
    }

    /// Log-probabilities of a `size` window split into nine tiles. Each branch
    /// output is cropped to its own tile, `size / 3`, before tiling.
    pub fn forward_window(&self, images: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        let outputs = self.branch_outputs(images);

        self.refine(tile_outputs(outputs, [size[0] / 3, size[1] / 3]))
    }

    fn branch_outputs(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let [batch, channels, height, width] = images.dims();
        assert_eq!(
            channels, UUNET_BRANCHES,
            "UUNet expects one input channel per branch ({}), got {}",
            UUNET_BRANCHES, channels
        );

        self.branches
            .iter()
            .enumerate()
            .map(|(k, branch)| {
                let channel = images
                    .clone()
                    .slice([0..batch, k..k + 1, 0..height, 0..width]);
                branch.features(channel)
            })
            .collect()
    }

    fn refine(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.norm_1.forward(self.clean_1.forward(x)));
        let x = self.activation.forward(self.norm_2.forward(self.clean_2.forward(x)));

        log_softmax(self.out.forward(x), 1)
    }
}

/// Lays nine `[batch, channels, rows, cols]` maps out row-major on a 3x3 grid,
/// keeping the centered `tile` of each.
pub fn tile_outputs<B: Backend>(outputs: Vec<Tensor<B, 4>>, tile: [usize; 2]) -> Tensor<B, 4> {
    let cropped: Vec<Tensor<B, 4>> = outputs
        .into_iter()
        .map(|output| center_crop(output, tile))
        .collect();
    let rows = cropped
        .chunks(3)
        .map(|row| Tensor::cat(row.to_vec(), 3))
        .collect();

    Tensor::cat(rows, 2)
}

impl<B: Backend> SegmentationModel<B> for UUNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        UUNet::forward(self, images)
    }

    fn forward_window(&self, images: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        UUNet::forward_window(self, images, size)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
