use burn::{
    nn::conv::{Conv2d, Conv2dConfig},
    prelude::*,
    tensor::activation::log_softmax,
};

use nn::PaddingConfig2d;

use super::SegmentationModel;
use super::blocks::{
    ConvBlock, ConvBlockConfig, DecoderBlock, DecoderBlockConfig, EncoderBlock, EncoderBlockConfig,
    u_shape_side,
};

#[derive(Module, Debug)]
pub struct UNet<B: Backend> {
    encoder_block_1: EncoderBlock<B>,
    encoder_block_2: EncoderBlock<B>,
    encoder_block_3: EncoderBlock<B>,
    encoder_block_4: EncoderBlock<B>,
    bottleneck: ConvBlock<B>,
    decoder_block_1: DecoderBlock<B>,
    decoder_block_2: DecoderBlock<B>,
    decoder_block_3: DecoderBlock<B>,
    decoder_block_4: DecoderBlock<B>,
    conv: Conv2d<B>,
    conv_1x1: Conv2d<B>,

    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct UNetConfig {
    #[config(default = "1")]
    pub input_channels: usize,
    #[config(default = "64")]
    base_channels: usize,
    #[config(default = "2")]
    num_classes: usize,
    #[config(default = "0.2")]
    dropout: f64,
}

impl UNetConfig {
    /// Output size for a `[rows, cols]` input, `None` unless both sides are
    /// divisible by 16.
    pub fn output_shape(&self, input: [usize; 2]) -> Option<[usize; 2]> {
        Some([u_shape_side(input[0], 4, 1)?, u_shape_side(input[1], 4, 1)?])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> UNet<B> {
        let c = self.base_channels;
        let conv_block =
            |input, filters| ConvBlockConfig::new(input, filters).with_dropout(self.dropout);

        UNet {
            encoder_block_1: EncoderBlockConfig::new(conv_block(self.input_channels, c))
                .init(device),
            encoder_block_2: EncoderBlockConfig::new(conv_block(c, c * 2)).init(device),
            encoder_block_3: EncoderBlockConfig::new(conv_block(c * 2, c * 4)).init(device),
            encoder_block_4: EncoderBlockConfig::new(conv_block(c * 4, c * 8)).init(device),
            bottleneck: conv_block(c * 8, c * 16).init(device),
            decoder_block_1: DecoderBlockConfig::new(c * 16, c * 8, conv_block(c * 16, c * 8))
                .init(device),
            decoder_block_2: DecoderBlockConfig::new(c * 8, c * 4, conv_block(c * 8, c * 4))
                .init(device),
            decoder_block_3: DecoderBlockConfig::new(c * 4, c * 2, conv_block(c * 4, c * 2))
                .init(device),
            decoder_block_4: DecoderBlockConfig::new(c * 2, c, conv_block(c * 2, c)).init(device),
            conv: Conv2dConfig::new([c, c], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            conv_1x1: Conv2dConfig::new([c, self.num_classes], [1, 1]).init(device),
            num_classes: self.num_classes,
        }
    }
}

impl<B: Backend> UNet<B> {
    /// Spatial dimensions must be divisible by 16.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = images;

        let (x, skip_features_1) = self.encoder_block_1.forward(x);
        let (x, skip_features_2) = self.encoder_block_2.forward(x);
        let (x, skip_features_3) = self.encoder_block_3.forward(x);
        let (x, skip_features_4) = self.encoder_block_4.forward(x);

        let x = self.bottleneck.forward(x);

        let x = self.decoder_block_1.forward(x, skip_features_4);
        let x = self.decoder_block_2.forward(x, skip_features_3);
        let x = self.decoder_block_3.forward(x, skip_features_2);
        let x = self.decoder_block_4.forward(x, skip_features_1);

        let x = self.conv.forward(x);
        let x = self.conv_1x1.forward(x);

        log_softmax(x, 1)
    }
}

impl<B: Backend> SegmentationModel<B> for UNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        UNet::forward(self, images)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
