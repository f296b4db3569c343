use burn::prelude::*;
use dermascan_model::preprocess::{decode, to_input};
use rand::Rng;

use crate::augment::Augmenter;
use crate::dataset::ImageItem;
use crate::error::TrainError;

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch, height, width, channels]`, normalized like the serving path.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Reads, optionally augments, and preprocesses `items` into a single batch.
pub fn load_batch<B: Backend, R: Rng + ?Sized>(
    items: &[&ImageItem],
    augmenter: Option<&Augmenter>,
    rng: &mut R,
    device: &B::Device,
) -> Result<ImageBatch<B>, TrainError> {
    let mut values = Vec::new();
    let mut targets = Vec::with_capacity(items.len());
    let mut shape = [0; 4];

    for item in items {
        let bytes = std::fs::read(&item.path).map_err(|e| TrainError::io(&item.path, e))?;
        let image = decode(&bytes).map_err(|source| TrainError::Image {
            path: item.path.clone(),
            source,
        })?;
        let image = match augmenter {
            Some(augmenter) => augmenter.apply(image, rng),
            None => image,
        };

        let input = to_input(&image);
        shape = input.shape();
        values.extend(input.into_values());
        targets.push(item.label as i64);
    }
    shape[0] = items.len();

    let images = Tensor::<B, 4>::from_data(TensorData::new(values, shape), device);
    let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets, [items.len()]), device);

    Ok(ImageBatch { images, targets })
}
