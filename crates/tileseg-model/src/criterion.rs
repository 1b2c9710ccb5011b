//! Segmentation loss combining primary, auxiliary and semantic-encoding
//! supervision.

use burn::{
    nn::loss::{BinaryCrossEntropyLossConfig, CrossEntropyLossConfig},
    prelude::*,
};

use crate::training::SegOutput;

/// Scalar, differentiable loss over every output of a forward pass.
pub trait Criterion<B: Backend> {
    /// Combined loss of `output` against integer `targets` `[N, H, W]`.
    fn compute(&self, output: &SegOutput<B>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1>;
}

/// Configuration for [`SegmentationLoss`].
#[derive(Config, Debug)]
pub struct SegmentationLossConfig {
    #[config(default = 2)]
    pub num_classes: usize,
    #[config(default = 0.2)]
    pub aux_weight: f32,
    #[config(default = 0.2)]
    pub se_weight: f32,
}

impl SegmentationLossConfig {
    pub const fn init(&self) -> SegmentationLoss {
        SegmentationLoss {
            num_classes: self.num_classes,
            aux_weight: self.aux_weight,
            se_weight: self.se_weight,
        }
    }
}

/// `CE(primary) + aux_weight * sum(CE(aux)) + se_weight * BCE(se, presence)`.
///
/// Heads that are absent from the output contribute nothing.
#[derive(Debug, Clone)]
pub struct SegmentationLoss {
    num_classes: usize,
    aux_weight: f32,
    se_weight: f32,
}

impl SegmentationLoss {
    fn pixel_ce<B: Backend>(logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [n, c, h, w] = logits.dims();
        let logits = logits.permute([0, 2, 3, 1]).reshape([n * h * w, c]);
        let targets = targets.reshape([n * h * w]);
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }

    /// `[N, C]` indicator of which classes occur in each target map.
    pub fn presence<B: Backend>(&self, targets: Tensor<B, 3, Int>) -> Tensor<B, 2, Int> {
        let [n, _, _] = targets.dims();
        let columns = (0..self.num_classes)
            .map(|class| {
                targets
                    .clone()
                    .equal_elem(class as i64)
                    .int()
                    .reshape([n as i32, -1])
                    .sum_dim(1)
                    .greater_elem(0)
                    .int()
            })
            .collect();
        Tensor::cat(columns, 1)
    }
}

impl<B: Backend> Criterion<B> for SegmentationLoss {
    fn compute(&self, output: &SegOutput<B>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let mut loss = Self::pixel_ce(output.primary.clone(), targets.clone());

        for aux in &output.aux {
            loss = loss + Self::pixel_ce(aux.clone(), targets.clone()).mul_scalar(self.aux_weight);
        }

        if let Some(se) = &output.se {
            let presence = self.presence(targets);
            let bce = BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(&se.device())
                .forward(se.clone(), presence);
            loss = loss + bce.mul_scalar(self.se_weight);
        }

        loss
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{ElementConversion, TensorData};

    use super::*;
    use crate::tests::TestBackend;

    fn targets(values: Vec<i64>, shape: [usize; 3]) -> Tensor<TestBackend, 3, Int> {
        Tensor::from_data(TensorData::new(values, shape), &Default::default())
    }

    #[test]
    fn presence_marks_classes_per_image() {
        let loss = SegmentationLossConfig::new().init();
        let t = targets(vec![0, 0, 0, 0, 0, 1, 1, 1], [2, 2, 2]);

        let presence = loss.presence(t);
        let values = presence.into_data().convert::<i64>().to_vec::<i64>().unwrap();
        assert_eq!(values, vec![1, 0, 1, 1]);
    }

    #[test]
    fn absent_heads_add_nothing() {
        let device = Default::default();
        let criterion = SegmentationLossConfig::new().init();
        let primary = Tensor::<TestBackend, 4>::random(
            [1, 2, 4, 4],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let t = targets(vec![1; 16], [1, 4, 4]);

        let bare = criterion.compute(&SegOutput::primary(primary.clone()), t.clone());
        let expected = SegmentationLoss::pixel_ce(primary, t);

        let bare: f32 = bare.into_scalar().elem();
        let expected: f32 = expected.into_scalar().elem();
        assert!((bare - expected).abs() < 1e-6);
    }

    #[test]
    fn auxiliary_terms_are_weighted() {
        let device = Default::default();
        let criterion = SegmentationLossConfig::new().with_aux_weight(0.5).init();
        let primary = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 2], &device);
        let t = targets(vec![0, 1, 0, 1], [1, 2, 2]);
        let output = SegOutput {
            primary: primary.clone(),
            se: None,
            aux: vec![primary.clone(), primary],
        };

        // Uniform logits give ln(2) per term: 1 + 0.5 * 2 = 2 terms' worth.
        let value: f32 = criterion.compute(&output, t).into_scalar().elem();
        assert!((value - 2.0 * std::f32::consts::LN_2).abs() < 1e-5);
    }
}
