use base64::{prelude::BASE64_STANDARD, Engine};
use bon::bon;
use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use profilepic_types::prelude::*;

use crate::{data_url, INPUT_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("empty image payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("cannot identify image: {0}")]
    Image(#[from] image::ImageError),
}

/// Strip an optional data-URL header and decode the base64 payload.
pub fn decode_payload(text: &str) -> Result<Vec<u8>, PreprocessError> {
    let data_url = data_url::parse(text);
    tracing::debug!(mime = ?data_url.mime, base64 = data_url.base64, "decoding image payload");
    let payload: String = data_url
        .payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(PreprocessError::Empty);
    }
    Ok(BASE64_STANDARD.decode(payload)?)
}

/// Decode any supported image format and drop it to 3-channel RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PreprocessError> {
    let image = image::load_from_memory(bytes)?;
    tracing::debug!(
        width = image.width(),
        height = image.height(),
        color = ?image.color(),
        "decoded image"
    );
    Ok(image.into_rgb8())
}

/// Turns uploaded images into model input: exact resize, batch of one, pinned normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    size: u32,
    normalization: Normalization,
}

#[bon]
impl Preprocessor {
    #[builder]
    pub fn new(
        #[builder(default = INPUT_SIZE)] size: u32,
        #[builder(default)] normalization: Normalization,
    ) -> Self {
        Self {
            size,
            normalization,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Resize to `size x size` ignoring aspect ratio, then normalise into an NHWC tensor.
    pub fn tensor(&self, image: &RgbImage) -> ImageTensor {
        // bicubic, same as the resampling the model was trained with
        let resized = image::imageops::resize(image, self.size, self.size, FilterType::CatmullRom);
        let size = self.size as usize;
        let mut tensor = Array4::zeros((1, size, size, ImageTensor::CHANNELS));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let values = self.normalization.apply(pixel.0);
            for (channel, value) in values.into_iter().enumerate() {
                tensor[[0, y as usize, x as usize, channel]] = value;
            }
        }
        ImageTensor(tensor)
    }

    pub fn run(&self, payload: &str) -> Result<ImageTensor, PreprocessError> {
        let bytes = decode_payload(payload)?;
        let image = decode_image(&bytes)?;
        Ok(self.tensor(&image))
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbaImage};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encoding a png in memory cannot fail");
        bytes
    }

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[rstest]
    #[case(224, 224)]
    #[case(640, 480)]
    #[case(17, 300)]
    #[case(1, 1)]
    fn resizes_exactly(#[case] width: u32, #[case] height: u32) -> anyhow::Result<()> {
        let payload = BASE64_STANDARD.encode(encode_png(&solid(width, height, [12, 34, 56])));
        let tensor = Preprocessor::default().run(&payload)?;
        assert_eq!(tensor.dim(), (1, 224, 224, 3));
        Ok(())
    }

    #[test]
    fn applies_caffe_normalisation_once() -> anyhow::Result<()> {
        let payload = BASE64_STANDARD.encode(encode_png(&solid(8, 8, [200, 100, 50])));
        let tensor = Preprocessor::builder().size(4).build().run(&payload)?;
        let pixel: Vec<f32> = tensor.0.slice(ndarray::s![0, 2, 3, ..]).to_vec();
        let expected = Normalization::Caffe.apply([200, 100, 50]);
        for (a, b) in pixel.iter().zip(expected) {
            assert!((a - b).abs() < 1e-3, "{pixel:?} != {expected:?}");
        }
        Ok(())
    }

    #[test]
    fn data_url_matches_raw_payload() -> anyhow::Result<()> {
        let raw = BASE64_STANDARD.encode(encode_png(&solid(30, 20, [1, 2, 3])));
        let preprocessor = Preprocessor::default();
        let from_raw = preprocessor.run(&raw)?;
        let from_url = preprocessor.run(&format!("data:image/png;base64,{raw}"))?;
        assert_eq!(from_raw, from_url);
        Ok(())
    }

    #[test]
    fn drops_alpha_channel() -> anyhow::Result<()> {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(5, 5, image::Rgba([9, 8, 7, 0])));
        let image = decode_image(&encode_png(&rgba))?;
        assert_eq!(image.get_pixel(0, 0).0, [9, 8, 7]);
        Ok(())
    }

    #[test]
    fn tolerates_wrapped_base64() -> anyhow::Result<()> {
        let raw = BASE64_STANDARD.encode(encode_png(&solid(3, 3, [0, 0, 0])));
        let (head, tail) = raw.split_at(raw.len() / 2);
        assert_eq!(decode_payload(&format!("{head}\n{tail}"))?, decode_payload(&raw)?);
        Ok(())
    }

    #[rstest]
    #[case("")]
    #[case("data:image/png;base64,")]
    fn rejects_empty_payload(#[case] payload: &str) {
        assert!(matches!(decode_payload(payload), Err(PreprocessError::Empty)));
    }

    #[rstest]
    #[case("not base64 at all!")]
    #[case("prefix,AAAA,BBBB")]
    #[case("data:image/png;base64,AAAA,BBBB")]
    fn rejects_invalid_base64(#[case] payload: &str) {
        assert!(matches!(decode_payload(payload), Err(PreprocessError::Base64(_))));
    }

    #[test]
    fn rejects_non_image_bytes() {
        let payload = BASE64_STANDARD.encode(b"definitely not an image, just some text bytes");
        assert!(matches!(
            Preprocessor::default().run(&payload),
            Err(PreprocessError::Image(_))
        ));
    }
}
