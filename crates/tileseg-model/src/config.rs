//! Backbone registry.
//!
//! Backbones form a closed set. Names are validated when the configuration
//! is parsed, so an unknown backbone never reaches model construction.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Supported ResNet backbones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    /// ResNet-18, basic blocks.
    Resnet18,
    /// ResNet-34, basic blocks.
    Resnet34,
    /// ResNet-50, bottleneck blocks.
    Resnet50,
    /// ResNet-101, bottleneck blocks.
    Resnet101,
    /// ResNet-152, bottleneck blocks.
    Resnet152,
}

impl Backbone {
    /// Every registered backbone, in registry order.
    pub const ALL: [Self; 5] = [
        Self::Resnet18,
        Self::Resnet34,
        Self::Resnet50,
        Self::Resnet101,
        Self::Resnet152,
    ];

    /// Registry name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Resnet18 => "resnet18",
            Self::Resnet34 => "resnet34",
            Self::Resnet50 => "resnet50",
            Self::Resnet101 => "resnet101",
            Self::Resnet152 => "resnet152",
        }
    }

    /// Residual blocks per stage.
    pub const fn blocks(self) -> [usize; 4] {
        match self {
            Self::Resnet18 => [2, 2, 2, 2],
            Self::Resnet34 | Self::Resnet50 => [3, 4, 6, 3],
            Self::Resnet101 => [3, 4, 23, 3],
            Self::Resnet152 => [3, 8, 36, 3],
        }
    }

    /// Whether stages are built from bottleneck blocks.
    pub const fn bottleneck(self) -> bool {
        !matches!(self, Self::Resnet18 | Self::Resnet34)
    }

    /// Output channels of the four stages.
    pub const fn stage_channels(self) -> [usize; 4] {
        if self.bottleneck() {
            [256, 512, 1024, 2048]
        } else {
            [64, 128, 256, 512]
        }
    }
}

impl fmt::Display for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backbone {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.name() == wanted)
            .ok_or_else(|| ModelError::UnknownBackbone {
                name: s.to_string(),
                expected: Self::ALL.map(Self::name).join(", "),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registered_names() {
        assert_eq!("resnet50".parse::<Backbone>().unwrap(), Backbone::Resnet50);
        assert_eq!(" ResNet101 ".parse::<Backbone>().unwrap(), Backbone::Resnet101);
    }

    #[test]
    fn rejects_unknown_backbone() {
        let err = "vgg16".parse::<Backbone>().unwrap_err();
        assert!(matches!(err, ModelError::UnknownBackbone { ref name, .. } if name == "vgg16"));
        assert!(err.to_string().contains("resnet152"));
    }

    #[test]
    fn stage_channels_follow_block_type() {
        assert_eq!(Backbone::Resnet18.stage_channels(), [64, 128, 256, 512]);
        assert_eq!(Backbone::Resnet152.stage_channels()[3], 2048);
    }
}
