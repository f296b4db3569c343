//! Image preprocessing shared by serving and training.
//!
//! The backbone is trained on ImageNet-normalized inputs, so every image goes through the
//! same steps: decode to RGB, bilinear resize to [`INPUT_SIZE`], scale to `[0, 1]`, then
//! subtract the per-channel mean and divide by the per-channel standard deviation.
use image::DynamicImage;
use image::imageops::FilterType;

use crate::classifier::ImageTensor;
use crate::error::PreprocessError;

/// Spatial resolution (height and width) the classifier expects.
pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;
pub const CHANNEL_MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; CHANNELS] = [0.229, 0.224, 0.225];

/// Decodes raw bytes (any format the `image` crate recognises) into an image.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    Ok(image::load_from_memory(bytes)?)
}

/// Converts an already decoded image into a normalized `[1, 224, 224, 3]` tensor.
pub fn to_input(image: &DynamicImage) -> ImageTensor {
    let size = INPUT_SIZE as usize;
    ImageTensor::new(normalized_pixels(image), [1, size, size, CHANNELS])
}

/// Runs the whole pipeline on an uploaded file.
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, PreprocessError> {
    let image = decode(bytes)?;
    Ok(to_input(&image))
}

/// Resized, normalized pixel values in row-major HWC order.
pub fn normalized_pixels(image: &DynamicImage) -> Vec<f32> {
    let rgb = image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let mut values = Vec::with_capacity(rgb.as_raw().len());
    for pixel in rgb.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            values.push(normalize(*value, channel));
        }
    }
    values
}

fn normalize(value: u8, channel: usize) -> f32 {
    (value as f32 / 255.0 - CHANNEL_MEAN[channel]) / CHANNEL_STD[channel]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use rstest::rstest;
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    #[rstest]
    #[case::tiny_rgb(DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0]))))]
    #[case::wide_rgb(DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 31, Rgb([12, 200, 7]))))]
    #[case::grayscale(DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 500, Luma([128]))))]
    #[case::with_alpha(DynamicImage::ImageRgba8(RgbaImage::from_pixel(224, 224, Rgba([1, 2, 3, 4]))))]
    fn output_shape_is_fixed(#[case] image: DynamicImage) {
        let tensor = preprocess(&encode(image, ImageFormat::Png)).unwrap();

        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
        assert_eq!(tensor.values().len(), 224 * 224 * 3);
    }

    #[test]
    fn applies_imagenet_normalization() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let tensor = preprocess(&encode(image, ImageFormat::Png)).unwrap();

        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (0.0 - 0.406) / 0.225,
        ];
        for (pixel, chunk) in tensor.values().chunks(3).enumerate() {
            for channel in 0..3 {
                assert!(
                    (chunk[channel] - expected[channel]).abs() < 1e-5,
                    "pixel {pixel} channel {channel}: {}",
                    chunk[channel]
                );
            }
        }
    }

    #[test]
    fn jpeg_input_is_accepted() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([90, 60, 30])));
        let tensor = preprocess(&encode(image, ImageFormat::Jpeg)).unwrap();
        assert_eq!(tensor.shape(), [1, 224, 224, 3]);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = preprocess(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }
}
