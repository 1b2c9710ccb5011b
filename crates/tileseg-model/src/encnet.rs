//! Reference segmentation network: ResNet features, a context-encoding head
//! with semantic-encoding (SE) logits, and an auxiliary FCN head.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::{
        activation::sigmoid,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::{
    config::Backbone,
    error::{ModelError, ModelResult},
    resnet::{ConvBn, ResNet},
    training::{SegOutput, SegmentationModel},
};

/// Configuration for [`EncNet`].
#[derive(Config, Debug)]
pub struct EncNetConfig {
    #[config(default = "Backbone::Resnet50")]
    pub backbone: Backbone,
    #[config(default = 2)]
    pub num_classes: usize,
    /// Attach the auxiliary FCN head on the third stage.
    #[config(default = true)]
    pub aux: bool,
    /// Emit image-level class presence logits.
    #[config(default = true)]
    pub se_loss: bool,
    #[config(default = false)]
    pub dilated: bool,
    /// Exclude backbone parameters from gradient computation.
    #[config(default = true)]
    pub freeze_backbone: bool,
    #[config(default = 512)]
    pub head_width: usize,
}

impl EncNetConfig {
    /// Initialize the network.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] when `num_classes` or
    /// `head_width` is zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<EncNet<B>> {
        if self.num_classes == 0 {
            return Err(ModelError::InvalidConfiguration {
                reason: "num_classes must be at least 1".into(),
            });
        }
        if self.head_width == 0 {
            return Err(ModelError::InvalidConfiguration {
                reason: "head_width must be at least 1".into(),
            });
        }

        let backbone = ResNet::new(self.backbone, self.dilated, device);
        let backbone = if self.freeze_backbone {
            backbone.no_grad()
        } else {
            backbone
        };
        let [_, _, c3, c4] = self.backbone.stage_channels();

        Ok(EncNet {
            backbone,
            head: EncHead::new(c4, self.head_width, self.num_classes, self.se_loss, device),
            aux_head: self
                .aux
                .then(|| FcnHead::new(c3, self.num_classes, device)),
        })
    }
}

/// Encoder/decoder segmentation network.
#[derive(Module, Debug)]
pub struct EncNet<B: Backend> {
    backbone: ResNet<B>,
    head: EncHead<B>,
    aux_head: Option<FcnHead<B>>,
}

impl<B: Backend> SegmentationModel<B> for EncNet<B> {
    fn forward(&self, images: Tensor<B, 4>) -> SegOutput<B> {
        let [_, _, height, width] = images.dims();
        let [_, _, c3, c4] = self.backbone.forward(images);

        let (primary, se) = self.head.forward(c4);
        let aux = self
            .aux_head
            .as_ref()
            .map(|head| upsample(head.forward(c3), [height, width]))
            .into_iter()
            .collect();

        SegOutput {
            primary: upsample(primary, [height, width]),
            se,
            aux,
        }
    }
}

fn upsample<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    interpolate(x, size, InterpolateOptions::new(InterpolateMode::Nearest))
}

/// Context-encoding head.
///
/// Globally pooled features gate the channels of the feature map and also
/// predict which classes are present in the image.
#[derive(Module, Debug)]
pub struct EncHead<B: Backend> {
    reduce: ConvBn<B>,
    relu: Relu,
    pool: AdaptiveAvgPool2d,
    gate: Linear<B>,
    se: Option<Linear<B>>,
    dropout: Dropout,
    classifier: Conv2d<B>,
}

impl<B: Backend> EncHead<B> {
    fn new(
        input: usize,
        width: usize,
        num_classes: usize,
        se_loss: bool,
        device: &Device<B>,
    ) -> Self {
        Self {
            reduce: ConvBn::new([input, width], 3, 1, 1, device),
            relu: Relu::new(),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            gate: LinearConfig::new(width, width).init(device),
            se: se_loss.then(|| LinearConfig::new(width, num_classes).init(device)),
            dropout: DropoutConfig::new(0.1).init(),
            classifier: Conv2dConfig::new([width, num_classes], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Option<Tensor<B, 2>>) {
        let feat = self.relu.forward(self.reduce.forward(x));
        let [n, c, _, _] = feat.dims();

        let context = self.pool.forward(feat.clone()).reshape([n, c]);
        let gamma = sigmoid(self.gate.forward(context.clone())).reshape([n, c, 1, 1]);
        let feat = self.relu.forward(feat.clone() + feat * gamma);

        let logits = self.classifier.forward(self.dropout.forward(feat));
        let se = self.se.as_ref().map(|layer| layer.forward(context));
        (logits, se)
    }
}

/// Plain FCN head: 3x3 reduction to a quarter of the channels, dropout,
/// 1x1 classifier.
#[derive(Module, Debug)]
pub struct FcnHead<B: Backend> {
    reduce: ConvBn<B>,
    relu: Relu,
    dropout: Dropout,
    classifier: Conv2d<B>,
}

impl<B: Backend> FcnHead<B> {
    fn new(input: usize, num_classes: usize, device: &Device<B>) -> Self {
        let inter = (input / 4).max(1);
        Self {
            reduce: ConvBn::new([input, inter], 3, 1, 1, device),
            relu: Relu::new(),
            dropout: DropoutConfig::new(0.1).init(),
            classifier: Conv2dConfig::new([inter, num_classes], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(self.reduce.forward(x));
        self.classifier.forward(self.dropout.forward(x))
    }
}
