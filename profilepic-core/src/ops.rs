//! CPU kernels for the in-process network. Feature maps are `(channels, height, width)`.

use anyhow::Context;
use ndarray::{prelude::*, Data};
use rayon::prelude::*;

pub fn relu_inplace<D: Dimension>(x: &mut Array<f32, D>) {
    x.mapv_inplace(|x| x.max(0.0));
}

pub fn softmax(logits: ArrayView1<f32>) -> anyhow::Result<Array1<f32>> {
    anyhow::ensure!(!logits.is_any_infinite(), "got inf in softmax input");
    anyhow::ensure!(!logits.is_any_nan(), "got nan in softmax input");
    let max_logit = logits.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exp_logits = logits.map(|x| (x - max_logit).exp());
    let sum_exp_logits = exp_logits.sum();
    anyhow::ensure!(sum_exp_logits > 0.0, "sum_exp_logits is 0, division by 0");
    Ok(exp_logits / sum_exp_logits)
}

pub fn zero_pad<S: Data<Elem = f32>>(input: &ArrayBase<S, Ix3>, pad: usize) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let mut padded = Array3::zeros((channels, height + 2 * pad, width + 2 * pad));
    padded
        .slice_mut(s![.., pad..pad + height, pad..pad + width])
        .assign(input);
    padded
}

fn output_size(input: usize, kernel: usize, stride: usize) -> anyhow::Result<usize> {
    anyhow::ensure!(stride > 0, "stride must be positive");
    anyhow::ensure!(
        input >= kernel,
        "feature map of size {input} is smaller than kernel {kernel}"
    );
    Ok((input - kernel) / stride + 1)
}

/// Valid (unpadded) 2D convolution via im2col. `kernel` is `(filters, channels, kh, kw)`.
pub fn conv2d(
    input: ArrayView3<f32>,
    kernel: ArrayView4<f32>,
    bias: ArrayView1<f32>,
    stride: usize,
) -> anyhow::Result<Array3<f32>> {
    let (channels, height, width) = input.dim();
    let (filters, kernel_channels, kernel_h, kernel_w) = kernel.dim();
    anyhow::ensure!(
        channels == kernel_channels,
        "conv expects {kernel_channels} input channels, got {channels}"
    );
    anyhow::ensure!(bias.len() == filters, "bias/filter count mismatch");
    let out_h = output_size(height, kernel_h, stride)?;
    let out_w = output_size(width, kernel_w, stride)?;
    let patch = channels * kernel_h * kernel_w;

    let columns = if kernel_h == 1 && kernel_w == 1 && stride == 1 {
        input.to_shape((channels, height * width))?.into_owned()
    } else {
        let view = &input;
        let values: Vec<f32> = (0..patch)
            .into_par_iter()
            .flat_map_iter(|row| {
                let channel = row / (kernel_h * kernel_w);
                let ky = (row / kernel_w) % kernel_h;
                let kx = row % kernel_w;
                (0..out_h).flat_map(move |oy| {
                    (0..out_w).map(move |ox| view[[channel, oy * stride + ky, ox * stride + kx]])
                })
            })
            .collect();
        Array2::from_shape_vec((patch, out_h * out_w), values)?
    };

    let weights = kernel.to_shape((filters, patch))?;
    let mut output = weights.dot(&columns);
    output += &bias.insert_axis(Axis(1));
    output
        .into_shape_with_order((filters, out_h, out_w))
        .context("conv output reshape")
}

pub fn max_pool2d(input: ArrayView3<f32>, size: usize, stride: usize) -> anyhow::Result<Array3<f32>> {
    let (channels, height, width) = input.dim();
    let out_h = output_size(height, size, stride)?;
    let out_w = output_size(width, size, stride)?;
    Ok(Array3::from_shape_fn((channels, out_h, out_w), |(c, oy, ox)| {
        input
            .slice(s![c, oy * stride..oy * stride + size, ox * stride..ox * stride + size])
            .fold(f32::NEG_INFINITY, |a, &b| a.max(b))
    }))
}

pub fn global_avg_pool(input: ArrayView3<f32>) -> anyhow::Result<Array1<f32>> {
    let (channels, height, width) = input.dim();
    input
        .to_shape((channels, height * width))?
        .mean_axis(Axis(1))
        .context("global pooling over an empty feature map")
}
