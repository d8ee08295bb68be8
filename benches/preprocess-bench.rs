use std::{hint::black_box, io::Cursor};

use criterion::{criterion_group, criterion_main, Criterion};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use profilepic_core::{
    network::{ResNet, ResNetConfig, Stage},
    preprocess::{decode_image, Preprocessor},
};

fn photo(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

pub fn preprocess(c: &mut Criterion) {
    let image = photo(640, 480);
    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    let preprocessor = Preprocessor::default();

    c.bench_function("decode png 640x480", |b| {
        b.iter(|| decode_image(black_box(&png)).unwrap())
    });
    c.bench_function("resize + normalise 640x480", |b| {
        b.iter(|| preprocessor.tensor(black_box(&image)))
    });
}

pub fn forward_small(c: &mut Criterion) {
    let config = ResNetConfig {
        input_size: 64,
        stages: vec![Stage { blocks: 2, width: 16 }, Stage { blocks: 2, width: 32 }],
        head_units: 32,
        ..ResNetConfig::resnet50()
    };
    let network = ResNet::untrained().config(config).call();
    let tensor = Preprocessor::builder()
        .size(64)
        .build()
        .tensor(&photo(64, 64));

    c.bench_function("small resnet forward", |b| {
        b.iter(|| {
            profilepic_core::classifier::classify(&network, black_box(&tensor)).unwrap()
        })
    });
}

criterion_group!(benches, preprocess, forward_small);
criterion_main!(benches);
