use burn::prelude::*;

use crate::error::ClassifierError;
use crate::host::ModelHost;
use crate::model::Classifier;

/// A dense `f32` tensor in NHWC layout, independent of any tensor library.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageTensor {
    values: Vec<f32>,
    shape: [usize; 4],
}

impl ImageTensor {
    /// # Panics
    ///
    /// Panics when `values` does not hold exactly as many elements as `shape` describes.
    pub fn new(values: Vec<f32>, shape: [usize; 4]) -> Self {
        assert_eq!(
            values.len(),
            shape.iter().product::<usize>(),
            "tensor values do not match shape {shape:?}"
        );
        Self { values, shape }
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn batch_size(&self) -> usize {
        self.shape[0]
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

/// Something that maps a single preprocessed image to a probability vector.
///
/// The server only talks to this trait, which keeps burn out of its request path and lets
/// tests substitute a deterministic stub.
pub trait ImageClassifier: Send + Sync {
    /// Width of the probability vector returned by [`predict`](Self::predict).
    fn num_classes(&self) -> usize;

    /// Runs a forward pass on a `[1, H, W, 3]` tensor and returns softmax probabilities.
    fn predict(&self, input: ImageTensor) -> Result<Vec<f32>, ClassifierError>;
}

/// [`ImageClassifier`] backed by a burn [`Classifier`] living on its own host thread.
pub struct BurnClassifier<B: Backend> {
    host: ModelHost<Classifier<B>>,
    device: B::Device,
    num_classes: usize,
}

impl<B: Backend> BurnClassifier<B> {
    pub fn new(
        model: Classifier<B>,
        device: B::Device,
        num_classes: usize,
    ) -> std::io::Result<Self> {
        Ok(Self {
            host: ModelHost::spawn(model)?,
            device,
            num_classes,
        })
    }
}

impl<B: Backend> ImageClassifier for BurnClassifier<B> {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: ImageTensor) -> Result<Vec<f32>, ClassifierError> {
        if input.batch_size() != 1 {
            return Err(ClassifierError::InvalidInput(format!(
                "expected a batch of one image, got shape {:?}",
                input.shape()
            )));
        }

        let device = self.device.clone();
        self.host
            .with(move |model| {
                let shape = input.shape();
                let data = TensorData::new(input.into_values(), shape);
                let images = Tensor::<B, 4>::from_data(data, &device);
                model
                    .forward_probabilities(images)
                    .into_data()
                    .to_vec::<f32>()
                    .map_err(|e| format!("{e:?}"))
            })
            .map_err(ClassifierError::from)?
            .map_err(ClassifierError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackboneConfig, ClassifierConfig};
    use crate::preprocess::INPUT_SIZE;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_classifier(num_classes: usize) -> BurnClassifier<TestBackend> {
        let device = Default::default();
        let config = ClassifierConfig::new(num_classes)
            .with_hidden_size(8)
            .with_backbone(BackboneConfig::new().with_channels(vec![4, 8]));
        BurnClassifier::new(config.init::<TestBackend>(&device), device, num_classes).unwrap()
    }

    fn blank_input(batch: usize) -> ImageTensor {
        let size = INPUT_SIZE as usize;
        ImageTensor::new(vec![0.5; batch * size * size * 3], [batch, size, size, 3])
    }

    #[test]
    fn predict_returns_a_probability_distribution() {
        let classifier = tiny_classifier(3);
        let probabilities = classifier.predict(blank_input(1)).unwrap();

        assert_eq!(probabilities.len(), 3);
        assert!(probabilities.iter().all(|p| *p >= 0.0 && *p <= 1.0));
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-3, "sum = {sum}");
    }

    #[test]
    fn predict_rejects_batches() {
        let classifier = tiny_classifier(2);
        let err = classifier.predict(blank_input(2)).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidInput(_)));
    }

    #[test]
    #[should_panic(expected = "tensor values do not match shape")]
    fn image_tensor_checks_its_shape() {
        ImageTensor::new(vec![0.0; 5], [1, 2, 2, 3]);
    }
}
