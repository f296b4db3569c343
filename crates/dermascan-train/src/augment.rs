use image::{DynamicImage, Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use rand::Rng;

use crate::config::AugmentationConfig;

/// Random perturbations applied to decoded training images before preprocessing.
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: DynamicImage, rng: &mut R) -> DynamicImage {
        if !self.config.enabled {
            return image;
        }

        let mut image = image;
        if self.config.horizontal_flip && rng.random_bool(0.5) {
            image = image.fliph();
        }
        if self.config.max_rotation > 0.0 {
            let turns = rng.random_range(-self.config.max_rotation..=self.config.max_rotation);
            image = DynamicImage::ImageRgb8(rotate(&image.to_rgb8(), turns));
        }
        if self.config.max_zoom > 0.0 {
            let zoom = rng.random_range(-self.config.max_zoom..=self.config.max_zoom);
            image = if zoom >= 0.0 {
                zoom_in(&image, zoom)
            } else {
                zoom_out(&image, -zoom)
            };
        }
        if self.config.max_contrast > 0.0 {
            let factor = rng.random_range(
                1.0 - self.config.max_contrast..=1.0 + self.config.max_contrast,
            );
            image = DynamicImage::ImageRgb8(adjust_contrast(image.to_rgb8(), factor));
        }
        image
    }
}

/// Crops the centre of the image, removing `fraction` of each side's length.
pub fn zoom_in(image: &DynamicImage, fraction: f32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let crop_width = ((width as f32 * (1.0 - fraction)).round() as u32).clamp(1, width);
    let crop_height = ((height as f32 * (1.0 - fraction)).round() as u32).clamp(1, height);

    image.crop_imm(
        (width - crop_width) / 2,
        (height - crop_height) / 2,
        crop_width,
        crop_height,
    )
}

/// Centres the image on a black canvas `fraction` larger on each side.
pub fn zoom_out(image: &DynamicImage, fraction: f32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let canvas_width = ((width as f32 * (1.0 + fraction)).round() as u32).max(width);
    let canvas_height = ((height as f32 * (1.0 + fraction)).round() as u32).max(height);

    let mut canvas = RgbImage::new(canvas_width, canvas_height);
    image::imageops::overlay(
        &mut canvas,
        &image.to_rgb8(),
        ((canvas_width - width) / 2) as i64,
        ((canvas_height - height) / 2) as i64,
    );
    DynamicImage::ImageRgb8(canvas)
}

/// Rotates about the centre by `turns` of a full circle. Uncovered pixels are black.
pub fn rotate(image: &RgbImage, turns: f32) -> RgbImage {
    rotate_about_center(
        image,
        turns * std::f32::consts::TAU,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}

/// Scales each channel's distance from its mean by `factor`.
pub fn adjust_contrast(mut image: RgbImage, factor: f32) -> RgbImage {
    let pixel_count = (image.width() as u64 * image.height() as u64).max(1) as f32;
    let mut means = [0.0f32; 3];
    for pixel in image.pixels() {
        for (mean, value) in means.iter_mut().zip(pixel.0) {
            *mean += value as f32;
        }
    }
    for mean in &mut means {
        *mean /= pixel_count;
    }

    for pixel in image.pixels_mut() {
        for (value, mean) in pixel.0.iter_mut().zip(means) {
            *value = ((*value as f32 - mean) * factor + mean).round().clamp(0.0, 255.0) as u8;
        }
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn half_and_half() -> RgbImage {
        RgbImage::from_fn(4, 2, |x, _| {
            if x < 2 { Rgb([100, 100, 100]) } else { Rgb([200, 200, 200]) }
        })
    }

    #[test]
    fn disabled_augmentation_is_the_identity() {
        let augmenter = Augmenter::new(AugmentationConfig {
            enabled: false,
            ..AugmentationConfig::default()
        });
        let image = DynamicImage::ImageRgb8(half_and_half());
        let mut rng = StdRng::seed_from_u64(7);

        let out = augmenter.apply(image.clone(), &mut rng);
        assert_eq!(out.to_rgb8(), image.to_rgb8());
    }

    #[test]
    fn zoom_keeps_the_centre() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let zoomed = zoom_in(&image, 0.1);
        assert_eq!((zoomed.width(), zoomed.height()), (90, 45));

        let unchanged = zoom_in(&image, 0.0);
        assert_eq!((unchanged.width(), unchanged.height()), (100, 50));
    }

    #[test]
    fn zoom_out_pads_with_black() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([255, 255, 255])));
        let zoomed = zoom_out(&image, 0.1).to_rgb8();

        assert_eq!(zoomed.dimensions(), (110, 55));
        assert_eq!(zoomed.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(zoomed.get_pixel(55, 27), &Rgb([255, 255, 255]));
    }

    #[test]
    fn rotation_keeps_the_size_and_blanks_the_corners() {
        let image = RgbImage::from_pixel(20, 20, Rgb([255, 255, 255]));

        let rotated = rotate(&image, 0.125);

        assert_eq!(rotated.dimensions(), (20, 20));
        assert_eq!(rotated.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rotated.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn contrast_scales_around_the_channel_mean() {
        let stronger = adjust_contrast(half_and_half(), 1.1);
        assert_eq!(stronger.get_pixel(0, 0), &Rgb([95, 95, 95]));
        assert_eq!(stronger.get_pixel(3, 1), &Rgb([205, 205, 205]));

        let flat = adjust_contrast(half_and_half(), 0.0);
        assert_eq!(flat.get_pixel(0, 0), &Rgb([150, 150, 150]));
    }

    #[test]
    fn seeded_augmentation_is_reproducible() {
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let image = DynamicImage::ImageRgb8(half_and_half());

        let first = augmenter.apply(image.clone(), &mut StdRng::seed_from_u64(42));
        let second = augmenter.apply(image, &mut StdRng::seed_from_u64(42));
        assert_eq!(first.to_rgb8(), second.to_rgb8());
    }
}
