//! ResNet feature extractor.
//!
//! Produces the four stage outputs (strides 4, 8, 16, 32, or 4, 8, 8, 8 when
//! dilated) consumed by the segmentation heads.

use core::f64::consts::SQRT_2;

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Initializer, PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::config::Backbone;

fn kaiming() -> Initializer {
    Initializer::KaimingNormal {
        gain: SQRT_2,
        fan_out_only: true,
    }
}

/// Convolution followed by batch norm, without activation.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    /// `kernel` is square; padding keeps the spatial size for stride 1.
    pub fn new(
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        dilation: usize,
        device: &Device<B>,
    ) -> Self {
        let pad = dilation * (kernel - 1) / 2;
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_stride([stride, stride])
            .with_dilation([dilation, dilation])
            .with_padding(PaddingConfig2d::Explicit(pad, pad))
            .with_bias(false)
            .with_initializer(kaiming())
            .init(device);
        let norm = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, norm }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.norm.forward(self.conv.forward(x))
    }
}

/// Two 3x3 convolutions with identity or projected shortcut.
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    first: ConvBn<B>,
    second: ConvBn<B>,
    shortcut: Option<ConvBn<B>>,
    relu: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(input: usize, output: usize, stride: usize, dilation: usize, device: &Device<B>) -> Self {
        Self {
            first: ConvBn::new([input, output], 3, stride, dilation, device),
            second: ConvBn::new([output, output], 3, 1, dilation, device),
            shortcut: (stride != 1 || input != output)
                .then(|| ConvBn::new([input, output], 1, stride, 1, device)),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(proj) => proj.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.relu.forward(self.first.forward(x));
        let out = self.second.forward(out);
        self.relu.forward(out + identity)
    }
}

/// 1x1 reduce, 3x3 spatial (strided, V1.5 placement), 1x1 expand.
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    reduce: ConvBn<B>,
    spatial: ConvBn<B>,
    expand: ConvBn<B>,
    shortcut: Option<ConvBn<B>>,
    relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(input: usize, output: usize, stride: usize, dilation: usize, device: &Device<B>) -> Self {
        let width = output / 4;
        Self {
            reduce: ConvBn::new([input, width], 1, 1, 1, device),
            spatial: ConvBn::new([width, width], 3, stride, dilation, device),
            expand: ConvBn::new([width, output], 1, 1, 1, device),
            shortcut: (stride != 1 || input != output)
                .then(|| ConvBn::new([input, output], 1, stride, 1, device)),
            relu: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(proj) => proj.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.relu.forward(self.reduce.forward(x));
        let out = self.relu.forward(self.spatial.forward(out));
        let out = self.expand.forward(out);
        self.relu.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub enum Residual<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> Residual<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Basic(block) => block.forward(x),
            Self::Bottleneck(block) => block.forward(x),
        }
    }
}

/// Stem: 7x7/2 convolution, batch norm, relu, 3x3/2 max pool.
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    conv: ConvBn<B>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    fn new(device: &Device<B>) -> Self {
        Self {
            conv: ConvBn::new([3, 64], 7, 2, 1, device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(self.relu.forward(self.conv.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: Stem<B>,
    layer1: Vec<Residual<B>>,
    layer2: Vec<Residual<B>>,
    layer3: Vec<Residual<B>>,
    layer4: Vec<Residual<B>>,
}

impl<B: Backend> ResNet<B> {
    /// Build the feature extractor for `backbone`.
    ///
    /// With `dilated`, the last two stages keep stride 8 and use dilation 2
    /// and 4 instead.
    pub fn new(backbone: Backbone, dilated: bool, device: &Device<B>) -> Self {
        let [n1, n2, n3, n4] = backbone.blocks();
        let [ch1, ch2, ch3, ch4] = backbone.stage_channels();
        let ((s3, d3), (s4, d4)) = if dilated { ((1, 2), (1, 4)) } else { ((2, 1), (2, 1)) };
        let bottleneck = backbone.bottleneck();

        Self {
            stem: Stem::new(device),
            layer1: stage(n1, [64, ch1], 1, 1, bottleneck, device),
            layer2: stage(n2, [ch1, ch2], 2, 1, bottleneck, device),
            layer3: stage(n3, [ch2, ch3], s3, d3, bottleneck, device),
            layer4: stage(n4, [ch3, ch4], s4, d4, bottleneck, device),
        }
    }

    /// Returns `[c1, c2, c3, c4]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> [Tensor<B, 4>; 4] {
        let x = self.stem.forward(x);
        let c1 = run(&self.layer1, x);
        let c2 = run(&self.layer2, c1.clone());
        let c3 = run(&self.layer3, c2.clone());
        let c4 = run(&self.layer4, c3.clone());
        [c1, c2, c3, c4]
    }
}

fn stage<B: Backend>(
    count: usize,
    [input, output]: [usize; 2],
    stride: usize,
    dilation: usize,
    bottleneck: bool,
    device: &Device<B>,
) -> Vec<Residual<B>> {
    (0..count)
        .map(|i| {
            let (cin, s) = if i == 0 { (input, stride) } else { (output, 1) };
            if bottleneck {
                Residual::Bottleneck(Bottleneck::new(cin, output, s, dilation, device))
            } else {
                Residual::Basic(BasicBlock::new(cin, output, s, dilation, device))
            }
        })
        .collect()
}

fn run<B: Backend>(blocks: &[Residual<B>], x: Tensor<B, 4>) -> Tensor<B, 4> {
    blocks.iter().fold(x, |x, block| block.forward(x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn resnet18_feature_strides() {
        let device = Default::default();
        let net = ResNet::<TestBackend>::new(Backbone::Resnet18, false, &device);
        let [c1, c2, c3, c4] = net.forward(Tensor::zeros([1, 3, 64, 64], &device));

        assert_eq!(c1.dims(), [1, 64, 16, 16]);
        assert_eq!(c2.dims(), [1, 128, 8, 8]);
        assert_eq!(c3.dims(), [1, 256, 4, 4]);
        assert_eq!(c4.dims(), [1, 512, 2, 2]);
    }

    #[test]
    fn dilated_resnet_keeps_stride_eight() {
        let device = Default::default();
        let net = ResNet::<TestBackend>::new(Backbone::Resnet18, true, &device);
        let [_, _, c3, c4] = net.forward(Tensor::zeros([1, 3, 64, 64], &device));

        assert_eq!(c3.dims(), [1, 256, 8, 8]);
        assert_eq!(c4.dims(), [1, 512, 8, 8]);
    }
}
