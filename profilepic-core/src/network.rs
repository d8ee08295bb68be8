use std::{fmt::Debug, path::Path};

use anyhow::Context;
use bon::bon;
use ndarray::prelude::*;
use profilepic_types::prelude::*;
use rand::random;

use crate::{
    classifier::Classifier,
    ops::{conv2d, global_avg_pool, max_pool2d, relu_inplace, softmax, zero_pad},
    weights::WeightsFile,
    INPUT_SIZE,
};

type Params<'a> = Vec<(String, ArrayViewD<'a, f32>)>;
type ParamsMut<'a> = Vec<(String, ArrayViewMutD<'a, f32>)>;

const BN_EPSILON: f32 = 1.001e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub blocks: usize,
    pub width: usize,
}

/// Shape of a bottleneck ResNet with a dense classification head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResNetConfig {
    pub input_size: usize,
    pub input_channels: usize,
    pub stem_width: usize,
    pub stages: Vec<Stage>,
    pub expansion: usize,
    pub head_units: usize,
    pub classes: usize,
}

impl ResNetConfig {
    /// ResNet50 v1 backbone, GAP, dense 256 + ReLU, dense 3 + softmax.
    pub fn resnet50() -> Self {
        Self {
            input_size: INPUT_SIZE as usize,
            input_channels: 3,
            stem_width: 64,
            stages: [(3, 64), (4, 128), (6, 256), (3, 512)]
                .into_iter()
                .map(|(blocks, width)| Stage { blocks, width })
                .collect(),
            expansion: 4,
            head_units: 256,
            classes: Label::COUNT,
        }
    }
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self::resnet50()
    }
}

#[derive(Clone)]
pub struct Conv2d {
    /// (filters, channels, kh, kw)
    pub kernel: Array4<f32>,
    pub bias: Array1<f32>,
    pub stride: usize,
    pub padding: usize,
}

impl Conv2d {
    fn new(
        (filters, channels, size): (usize, usize, usize),
        stride: usize,
        padding: usize,
        init: &mut impl FnMut(usize) -> f32,
    ) -> Self {
        let fan_in = channels * size * size;
        Self {
            kernel: Array4::from_shape_simple_fn((filters, channels, size, size), || init(fan_in)),
            bias: Array1::zeros(filters),
            stride,
            padding,
        }
    }

    pub fn forward(&self, input: ArrayView3<f32>) -> anyhow::Result<Array3<f32>> {
        if self.padding == 0 {
            return conv2d(input, self.kernel.view(), self.bias.view(), self.stride);
        }
        let padded = zero_pad(&input, self.padding);
        conv2d(padded.view(), self.kernel.view(), self.bias.view(), self.stride)
    }

    fn parameters(&self, prefix: &str) -> Params<'_> {
        vec![
            (format!("{prefix}.kernel"), self.kernel.view().into_dyn()),
            (format!("{prefix}.bias"), self.bias.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self, prefix: &str) -> ParamsMut<'_> {
        vec![
            (format!("{prefix}.kernel"), self.kernel.view_mut().into_dyn()),
            (format!("{prefix}.bias"), self.bias.view_mut().into_dyn()),
        ]
    }
}

/// Inference-mode batch normalisation over the channel axis.
#[derive(Clone)]
pub struct BatchNorm {
    pub gamma: Array1<f32>,
    pub beta: Array1<f32>,
    pub moving_mean: Array1<f32>,
    pub moving_variance: Array1<f32>,
}

impl BatchNorm {
    fn identity(channels: usize) -> Self {
        Self {
            gamma: Array1::ones(channels),
            beta: Array1::zeros(channels),
            moving_mean: Array1::zeros(channels),
            moving_variance: Array1::ones(channels),
        }
    }

    pub fn forward_inplace(&self, x: &mut Array3<f32>) -> anyhow::Result<()> {
        anyhow::ensure!(
            x.dim().0 == self.gamma.len(),
            "batch norm over {} channels got {}",
            self.gamma.len(),
            x.dim().0
        );
        for (c, mut plane) in x.axis_iter_mut(Axis(0)).enumerate() {
            let scale = self.gamma[c] / (self.moving_variance[c] + BN_EPSILON).sqrt();
            let shift = self.beta[c] - self.moving_mean[c] * scale;
            plane.mapv_inplace(|v| v * scale + shift);
        }
        Ok(())
    }

    fn parameters(&self, prefix: &str) -> Params<'_> {
        vec![
            (format!("{prefix}.gamma"), self.gamma.view().into_dyn()),
            (format!("{prefix}.beta"), self.beta.view().into_dyn()),
            (format!("{prefix}.moving_mean"), self.moving_mean.view().into_dyn()),
            (format!("{prefix}.moving_variance"), self.moving_variance.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self, prefix: &str) -> ParamsMut<'_> {
        vec![
            (format!("{prefix}.gamma"), self.gamma.view_mut().into_dyn()),
            (format!("{prefix}.beta"), self.beta.view_mut().into_dyn()),
            (format!("{prefix}.moving_mean"), self.moving_mean.view_mut().into_dyn()),
            (format!("{prefix}.moving_variance"), self.moving_variance.view_mut().into_dyn()),
        ]
    }
}

#[derive(Clone)]
pub struct ConvBn {
    pub conv: Conv2d,
    pub bn: BatchNorm,
}

impl ConvBn {
    fn new(
        shape: (usize, usize, usize),
        stride: usize,
        padding: usize,
        init: &mut impl FnMut(usize) -> f32,
    ) -> Self {
        Self {
            conv: Conv2d::new(shape, stride, padding, init),
            bn: BatchNorm::identity(shape.0),
        }
    }

    fn forward(&self, input: ArrayView3<f32>, relu: bool) -> anyhow::Result<Array3<f32>> {
        let mut x = self.conv.forward(input)?;
        self.bn.forward_inplace(&mut x)?;
        if relu {
            relu_inplace(&mut x);
        }
        Ok(x)
    }

    fn parameters(&self, prefix: &str) -> Params<'_> {
        let mut params = self.conv.parameters(&format!("{prefix}_conv"));
        params.extend(self.bn.parameters(&format!("{prefix}_bn")));
        params
    }

    fn parameters_mut(&mut self, prefix: &str) -> ParamsMut<'_> {
        let mut params = self.conv.parameters_mut(&format!("{prefix}_conv"));
        params.extend(self.bn.parameters_mut(&format!("{prefix}_bn")));
        params
    }
}

/// 1x1 reduce, 3x3, 1x1 expand, with an optional projection shortcut.
#[derive(Clone)]
pub struct Bottleneck {
    pub shortcut: Option<ConvBn>,
    pub reduce: ConvBn,
    pub spatial: ConvBn,
    pub expand: ConvBn,
}

impl Bottleneck {
    fn new(
        in_channels: usize,
        width: usize,
        expansion: usize,
        stride: usize,
        init: &mut impl FnMut(usize) -> f32,
    ) -> Self {
        let out_channels = width * expansion;
        let shortcut = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new((out_channels, in_channels, 1), stride, 0, init));
        Self {
            shortcut,
            reduce: ConvBn::new((width, in_channels, 1), stride, 0, init),
            spatial: ConvBn::new((width, width, 3), 1, 1, init),
            expand: ConvBn::new((out_channels, width, 1), 1, 0, init),
        }
    }

    fn forward(&self, input: ArrayView3<f32>) -> anyhow::Result<Array3<f32>> {
        let x = self.reduce.forward(input, true)?;
        let x = self.spatial.forward(x.view(), true)?;
        let mut x = self.expand.forward(x.view(), false)?;
        match &self.shortcut {
            Some(shortcut) => x += &shortcut.forward(input, false)?,
            None => x += &input,
        }
        relu_inplace(&mut x);
        Ok(x)
    }

    fn parameters(&self, prefix: &str) -> Params<'_> {
        let mut params = Vec::new();
        if let Some(shortcut) = &self.shortcut {
            params.extend(shortcut.parameters(&format!("{prefix}_0")));
        }
        params.extend(self.reduce.parameters(&format!("{prefix}_1")));
        params.extend(self.spatial.parameters(&format!("{prefix}_2")));
        params.extend(self.expand.parameters(&format!("{prefix}_3")));
        params
    }

    fn parameters_mut(&mut self, prefix: &str) -> ParamsMut<'_> {
        let mut params = Vec::new();
        if let Some(shortcut) = &mut self.shortcut {
            params.extend(shortcut.parameters_mut(&format!("{prefix}_0")));
        }
        params.extend(self.reduce.parameters_mut(&format!("{prefix}_1")));
        params.extend(self.spatial.parameters_mut(&format!("{prefix}_2")));
        params.extend(self.expand.parameters_mut(&format!("{prefix}_3")));
        params
    }
}

#[derive(Clone)]
pub struct Dense {
    /// (n_out, n_in)
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Dense {
    fn new(n_in: usize, n_out: usize, init: &mut impl FnMut(usize) -> f32) -> Self {
        Self {
            weights: Array2::from_shape_simple_fn((n_out, n_in), || init(n_in)),
            bias: Array1::zeros(n_out),
        }
    }

    pub fn forward(&self, input: ArrayView1<f32>) -> anyhow::Result<Array1<f32>> {
        anyhow::ensure!(
            self.weights.dim().1 == input.dim(),
            "dense layer expects {} inputs, got {}",
            self.weights.dim().1,
            input.dim()
        );
        Ok(self.weights.dot(&input) + &self.bias)
    }

    fn parameters(&self, prefix: &str) -> Params<'_> {
        vec![
            (format!("{prefix}.kernel"), self.weights.view().into_dyn()),
            (format!("{prefix}.bias"), self.bias.view().into_dyn()),
        ]
    }

    fn parameters_mut(&mut self, prefix: &str) -> ParamsMut<'_> {
        vec![
            (format!("{prefix}.kernel"), self.weights.view_mut().into_dyn()),
            (format!("{prefix}.bias"), self.bias.view_mut().into_dyn()),
        ]
    }
}

/// The profile picture network, rebuilt in process so that only its weights need loading.
#[derive(Clone)]
pub struct ResNet {
    config: ResNetConfig,
    stem: ConvBn,
    stages: Vec<Vec<Bottleneck>>,
    hidden: Dense,
    output: Dense,
}

#[bon]
impl ResNet {
    fn build(config: ResNetConfig, mut init: impl FnMut(usize) -> f32) -> Self {
        let stem = ConvBn::new((config.stem_width, config.input_channels, 7), 2, 3, &mut init);
        let mut channels = config.stem_width;
        let stages = config
            .stages
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                (0..stage.blocks)
                    .map(|block| {
                        let stride = if index > 0 && block == 0 { 2 } else { 1 };
                        let bottleneck =
                            Bottleneck::new(channels, stage.width, config.expansion, stride, &mut init);
                        channels = stage.width * config.expansion;
                        bottleneck
                    })
                    .collect()
            })
            .collect();
        let hidden = Dense::new(channels, config.head_units, &mut init);
        let output = Dense::new(config.head_units, config.classes, &mut init);
        Self {
            config,
            stem,
            stages,
            hidden,
            output,
        }
    }

    /// Architecture with every parameter zeroed, ready for [`ResNet::load_weights`].
    pub fn zeroed(config: ResNetConfig) -> Self {
        Self::build(config, |_| 0.0)
    }

    #[builder]
    pub fn untrained(config: ResNetConfig) -> Self {
        Self::build(config, |fan_in| {
            (random::<f32>() * 2.0 - 1.0) * (1.0 / fan_in as f32).sqrt()
        })
    }

    #[builder]
    pub fn from_weights(config: ResNetConfig, path: &Path) -> anyhow::Result<Self> {
        let mut network = Self::zeroed(config);
        network.load_weights(path)?;
        Ok(network)
    }

    pub fn load_weights(&mut self, path: &Path) -> anyhow::Result<()> {
        let file = WeightsFile::read(path)?;
        let expected = self.parameters().len();
        let assigned = file
            .assign(self.parameters_mut())
            .with_context(|| format!("weights in {} do not fit the network", path.display()))?;
        tracing::debug!(assigned, expected, "loaded weights");
        Ok(())
    }

    pub fn save_weights(&self, path: &Path) -> anyhow::Result<()> {
        WeightsFile::collect(self.parameters()).write(path)
    }

    /// Every parameter with its canonical name, in layer order.
    pub fn parameters(&self) -> Params<'_> {
        let mut params = self.stem.parameters("conv1");
        for (stage, blocks) in self.stages.iter().enumerate() {
            for (block, bottleneck) in blocks.iter().enumerate() {
                params.extend(bottleneck.parameters(&format!("conv{}_block{}", stage + 2, block + 1)));
            }
        }
        params.extend(self.hidden.parameters("dense_hidden"));
        params.extend(self.output.parameters("dense_output"));
        params
    }

    fn parameters_mut(&mut self) -> ParamsMut<'_> {
        let mut params = self.stem.parameters_mut("conv1");
        for (stage, blocks) in self.stages.iter_mut().enumerate() {
            for (block, bottleneck) in blocks.iter_mut().enumerate() {
                params.extend(bottleneck.parameters_mut(&format!("conv{}_block{}", stage + 2, block + 1)));
            }
        }
        params.extend(self.hidden.parameters_mut("dense_hidden"));
        params.extend(self.output.parameters_mut("dense_output"));
        params
    }

    /// Forward pass over one `(channels, height, width)` image, returning class probabilities.
    pub fn forward(&self, input: ArrayView3<f32>) -> anyhow::Result<Array1<f32>> {
        let x = self.stem.forward(input, true)?;
        let x = max_pool2d(zero_pad(&x, 1).view(), 3, 2)?;
        let x = self
            .stages
            .iter()
            .flatten()
            .try_fold(x, |x, bottleneck| bottleneck.forward(x.view()))?;
        let pooled = global_avg_pool(x.view())?;
        // dropout layers are identity at inference
        let mut hidden = self.hidden.forward(pooled.view())?;
        relu_inplace(&mut hidden);
        let logits = self.output.forward(hidden.view())?;
        softmax(logits.view())
    }
}

impl Classifier for ResNet {
    fn backend(&self) -> &'static str {
        "native"
    }

    fn input_size(&self) -> u32 {
        self.config.input_size as u32
    }

    fn predict(&self, input: &ImageTensor) -> anyhow::Result<Probabilities> {
        let size = self.config.input_size;
        anyhow::ensure!(
            input.is_single_rgb() && input.spatial_dim() == (size, size),
            "expected input shape [1, {size}, {size}, 3], got {:?}",
            input.shape()
        );
        let chw = input
            .index_axis(Axis(0), 0)
            .permuted_axes([2, 0, 1])
            .as_standard_layout()
            .into_owned();
        Ok(Probabilities(self.forward(chw.view())?))
    }
}

impl Debug for ResNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let blocks: Vec<_> = self.stages.iter().map(Vec::len).collect();
        let parameters: usize = self.parameters().iter().map(|(_, p)| p.len()).sum();
        write!(
            f,
            "ResNet {{ input: {:?}, blocks: {:?}, head: {:?}, parameters: {} }}",
            (self.config.input_size, self.config.input_size, self.config.input_channels),
            blocks,
            (self.hidden.weights.dim(), self.output.weights.dim()),
            parameters
        )
    }
}
