use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::prelude::*;
use burn::tensor::activation::softmax;

use crate::preprocess::{CHANNELS, INPUT_SIZE};

#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Output channels of each convolutional block. Every block halves the spatial size.
    #[config(default = "vec![32, 64, 128, 256]")]
    pub channels: Vec<usize>,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let mut in_channels = CHANNELS;
        let mut blocks = Vec::with_capacity(self.channels.len());
        for &out_channels in &self.channels {
            blocks.push(ConvBlock::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Backbone {
            blocks,
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }

    /// Size of the feature vector the backbone hands to the head.
    pub fn num_features(&self) -> usize {
        self.channels.last().copied().unwrap_or(CHANNELS)
    }
}

/// Two 3x3 convolutions followed by a 2x2 max pool.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv_in: Conv2d<B>,
    conv_out: Conv2d<B>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv_in = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let conv_out = Conv2dConfig::new([out_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        Self {
            conv_in,
            conv_out,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.activation.forward(self.conv_in.forward(x));
        let x = self.activation.forward(self.conv_out.forward(x));
        self.pool.forward(x)
    }
}

/// Convolutional feature extractor reused through transfer learning.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub blocks: Vec<ConvBlock<B>>,
    pub pool: AdaptiveAvgPool2d,
}

impl<B: Backend> Backbone<B> {
    /// Maps `[batch, channels, height, width]` images to `[batch, features]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .blocks
            .iter()
            .fold(images, |x, block| block.forward(x));
        self.pool_features(x)
    }

    /// Global average pool of the last block's feature maps into `[batch, features]`.
    pub fn pool_features(&self, maps: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(maps);
        let [batch, features, _, _] = x.dims();
        x.reshape([batch, features])
    }
}

/// Batch-normalized dense layers trained on top of the backbone features.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    norm: BatchNorm<B>,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.norm.forward(features);
        let x = self.activation.forward(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub num_classes: usize,
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 256)]
    pub hidden_size: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
}

impl ClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier {
            backbone: self.backbone.init(device),
            head: self.init_head(device),
        }
    }

    /// Builds a classifier around an existing (typically pretrained) backbone.
    pub fn init_with_backbone<B: Backend>(
        &self,
        backbone: Backbone<B>,
        device: &B::Device,
    ) -> Classifier<B> {
        Classifier {
            backbone,
            head: self.init_head(device),
        }
    }

    fn init_head<B: Backend>(&self, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            norm: BatchNormConfig::new(self.backbone.num_features()).init(device),
            hidden: LinearConfig::new(self.backbone.num_features(), self.hidden_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_size, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Checks that the artifact was built for the input contract of this crate.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_classes == 0 {
            return Err("classifier has no output classes".to_string());
        }
        if self.image_size != INPUT_SIZE as usize {
            return Err(format!(
                "classifier expects {0}x{0} inputs but the preprocessor produces {1}x{1}",
                self.image_size, INPUT_SIZE
            ));
        }
        if self.backbone.channels.is_empty() {
            return Err("backbone has no convolutional blocks".to_string());
        }
        Ok(())
    }
}

/// Image classifier: convolutional backbone plus a dense head.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: ClassifierHead<B>,
}

impl<B: Backend> Classifier<B> {
    /// Maps NHWC images (`[batch, height, width, 3]`) to unnormalized class scores.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let images = images.permute([0, 3, 1, 2]);
        let features = self.backbone.forward(images);
        self.head.forward(features)
    }

    /// Same as [`forward`](Self::forward) followed by a softmax over classes.
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }
}
