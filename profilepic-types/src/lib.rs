use std::{cmp::Ordering, collections::BTreeMap, fmt::Display};

use anyhow::Context;
use derive_more::{AsRef, Deref, From, Index};
use ndarray::{Array1, Array4};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumCount, EnumIter, EnumString, IntoEnumIterator};

pub mod normalization;
pub mod prelude;
pub mod time;

/// Output categories, declared in the order the model was exported with.
/// `Label as usize` is the index of the label in the model output.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    AsRefStr,
    EnumCount,
    EnumIter,
    EnumString,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Label {
    Human,
    Avatar,
    Animal,
}

impl Label {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }
}

/// Model output, one probability per [`Label`].
#[derive(Debug, Clone, PartialEq, Default, Index, AsRef, From)]
pub struct Probabilities(#[index] pub Array1<f32>);

impl Probabilities {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sum(&self) -> f32 {
        self.0.sum()
    }

    /// Index and value of the largest probability. Ties go to the lowest index, NaN is ignored.
    pub fn argmax(&self) -> Option<(usize, f32)> {
        self.0
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, value)| !value.is_nan())
            .fold(None, |best, (index, value)| match best {
                Some((_, best_value))
                    if value.partial_cmp(&best_value) != Some(Ordering::Greater) =>
                {
                    best
                }
                _ => Some((index, value)),
            })
    }
}

impl From<Vec<f32>> for Probabilities {
    fn from(values: Vec<f32>) -> Self {
        Self(Array1::from_vec(values))
    }
}

impl Display for Probabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A classified image: the winning label, its probability and the full distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub classification: Label,
    pub confidence: f32,
    pub all_predictions: BTreeMap<Label, f32>,
}

impl Classification {
    pub fn from_probabilities(probabilities: &Probabilities) -> anyhow::Result<Self> {
        anyhow::ensure!(
            probabilities.len() == Label::COUNT,
            "model produced {} outputs, expected {}",
            probabilities.len(),
            Label::COUNT
        );
        anyhow::ensure!(
            probabilities.0.iter().all(|p| p.is_finite()),
            "model produced non-finite probabilities: {probabilities}"
        );
        let (index, confidence) = probabilities.argmax().context("empty model output")?;
        let classification = Label::from_index(index).context("prediction index out of range")?;
        let all_predictions = Label::iter()
            .map(|label| (label, probabilities[label.index()]))
            .collect();
        Ok(Self {
            classification,
            confidence,
            all_predictions,
        })
    }
}

/// Normalised model input, `[batch = 1, height, width, channels = 3]`.
#[derive(Debug, Clone, PartialEq, AsRef, Deref, From)]
pub struct ImageTensor(pub Array4<f32>);

impl ImageTensor {
    pub const CHANNELS: usize = 3;

    /// `(height, width)` of the single image in the batch.
    pub fn spatial_dim(&self) -> (usize, usize) {
        let (_, height, width, _) = self.0.dim();
        (height, width)
    }

    pub fn is_single_rgb(&self) -> bool {
        let (batch, _, _, channels) = self.0.dim();
        batch == 1 && channels == Self::CHANNELS
    }
}
