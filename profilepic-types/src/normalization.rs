use serde::{Deserialize, Serialize};
use strum::{EnumIter, EnumString};

/// Per-pixel transform applied to RGB input in `[0, 255]` before the forward pass.
///
/// The scheme belongs to the model artifact: a model trained with one scheme
/// and served with another still produces probabilities, just wrong ones.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Normalization {
    /// ResNet50 scheme: channels reordered to BGR, then the ImageNet BGR mean is subtracted.
    #[default]
    Caffe,
    /// `(x / 255 - mean) / std` with the ImageNet RGB statistics.
    Torch,
    /// `x / 127.5 - 1`.
    Tf,
    /// Pixel values passed through as floats.
    Raw,
}

pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];
pub const TORCH_MEAN_RGB: [f32; 3] = [0.485, 0.456, 0.406];
pub const TORCH_STD_RGB: [f32; 3] = [0.229, 0.224, 0.225];

impl Normalization {
    /// Normalise one RGB pixel into the channel order the model expects.
    pub fn apply(self, [r, g, b]: [u8; 3]) -> [f32; 3] {
        let rgb = [f32::from(r), f32::from(g), f32::from(b)];
        match self {
            Normalization::Caffe => {
                let [r, g, b] = rgb;
                [b - CAFFE_MEAN_BGR[0], g - CAFFE_MEAN_BGR[1], r - CAFFE_MEAN_BGR[2]]
            }
            Normalization::Torch => {
                std::array::from_fn(|c| (rgb[c] / 255.0 - TORCH_MEAN_RGB[c]) / TORCH_STD_RGB[c])
            }
            Normalization::Tf => rgb.map(|x| x / 127.5 - 1.0),
            Normalization::Raw => rgb,
        }
    }
}
