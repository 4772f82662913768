use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Relu,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        pool::MaxPool2d,
    },
    prelude::*,
    tensor::BasicOps,
};
use nn::{PaddingConfig2d, pool::MaxPool2dConfig};

/// A 3x3 convolution with an optional batch norm behind it.
#[derive(Module, Debug)]
struct NormedConv<B: Backend> {
    conv: Conv2d<B>,
    norm: Option<BatchNorm<B, 2>>,
}

impl<B: Backend> NormedConv<B> {
    fn new(
        channels: [usize; 2],
        padding: &PaddingConfig2d,
        batch_norm: bool,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: Conv2dConfig::new(channels, [3, 3])
                .with_padding(padding.clone())
                .init(device),
            norm: batch_norm.then(|| BatchNormConfig::new(channels[1]).init(device)),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        }
    }
}

/// Two [`NormedConv`] stages with a ReLU after each and dropout in between.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    first: NormedConv<B>,
    second: NormedConv<B>,
    activation: Relu,
    dropout: Dropout,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.first.forward(x));
        let x = self.dropout.forward(x);

        self.activation.forward(self.second.forward(x))
    }
}

#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    input_channels: usize,
    num_filters: usize,
    /// Output channels of the first convolution, `num_filters` when unset.
    #[config(default = "None")]
    middle_channels: Option<usize>,
    #[config(default = "0.2")]
    dropout: f64,
    #[config(default = false)]
    batch_norm: bool,
    #[config(default = "PaddingConfig2d::Same")]
    padding: PaddingConfig2d,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvBlock<B> {
        let middle = self.middle_channels.unwrap_or(self.num_filters);

        ConvBlock {
            first: NormedConv::new(
                [self.input_channels, middle],
                &self.padding,
                self.batch_norm,
                device,
            ),
            second: NormedConv::new(
                [middle, self.num_filters],
                &self.padding,
                self.batch_norm,
                device,
            ),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct EncoderBlock<B: Backend> {
    conv_block: ConvBlock<B>,
    max_pool: MaxPool2d,
}

impl<B: Backend> EncoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip_features = self.conv_block.forward(x);
        let x = self.max_pool.forward(skip_features.clone());

        (x, skip_features)
    }
}

#[derive(Config, Debug)]
pub struct EncoderBlockConfig {
    conv_block: ConvBlockConfig,
}

impl EncoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> EncoderBlock<B> {
        EncoderBlock {
            conv_block: self.conv_block.init(device),
            max_pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    conv_transpose: ConvTranspose2d<B>,
    conv_block: ConvBlock<B>,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip_features: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv_transpose.forward(x);
        let [_, _, height, width] = x.dims();
        let skip_features = center_crop(skip_features, [height, width]);
        let x = Tensor::cat(vec![x, skip_features], 1);

        self.conv_block.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct DecoderBlockConfig {
    input_channels: usize,
    num_filters: usize,
    conv_block: ConvBlockConfig,
}

impl DecoderBlockConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        DecoderBlock {
            conv_transpose: ConvTranspose2dConfig::new(
                [self.input_channels, self.num_filters],
                [2, 2],
            )
            .with_stride([2, 2])
            .init(device),
            conv_block: self.conv_block.init(device),
        }
    }
}

/// Crops the spatial dimensions of `x` around its center down to `size`.
///
/// Valid-padded encoders produce skip features larger than the upsampled
/// decoder input; this trims them to match. Returns `x` untouched when it
/// already has the requested size.
///
/// # Panics
///
/// If `size` is larger than the spatial dimensions of `x`.
pub fn center_crop<B: Backend, K: BasicOps<B>>(
    x: Tensor<B, 4, K>,
    size: [usize; 2],
) -> Tensor<B, 4, K> {
    let [batch, channels, height, width] = x.dims();
    let [target_height, target_width] = size;

    assert!(
        target_height <= height && target_width <= width,
        "Cannot crop ({},{}) to a larger size ({},{})",
        height,
        width,
        target_height,
        target_width
    );

    if target_height == height && target_width == width {
        return x;
    }

    let top = (height - target_height) / 2;
    let left = (width - target_width) / 2;

    x.slice([
        0..batch,
        0..channels,
        top..top + target_height,
        left..left + target_width,
    ])
}

/// Padding of a 3x3 convolution along `[rows, cols]`.
pub(crate) fn padding_per_axis(padding: &PaddingConfig2d) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Same => [1, 1],
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Explicit(rows, cols) => [*rows, *cols],
    }
}

fn conv3_side(side: usize, pad: usize) -> Option<usize> {
    (side + 2 * pad).checked_sub(2).filter(|&side| side > 0)
}

/// Side length after the two convolutions of a [ConvBlock].
pub(crate) fn conv_block_side(side: usize, pad: usize) -> Option<usize> {
    conv3_side(side, pad).and_then(|side| conv3_side(side, pad))
}

/// Side length produced by `levels` encoder/decoder pairs around a bottleneck
/// block, all padded by `pad`.
///
/// `None` when a level collapses to nothing or reaches a pooling layer with an
/// odd side, which would shift the upsampled map against its skip features.
pub(crate) fn u_shape_side(side: usize, levels: usize, pad: usize) -> Option<usize> {
    let skip = conv_block_side(side, pad)?;
    if levels == 0 {
        return Some(skip);
    }
    if skip % 2 != 0 {
        return None;
    }

    let below = u_shape_side(skip / 2, levels - 1, pad)?;
    conv_block_side(2 * below, pad)
}
