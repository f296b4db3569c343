use std::fmt::Formatter;
use std::sync::Arc;

use dermascan_model::{LabelMap, preprocess};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::cache::ModelCache;
use crate::error::ServeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub predicted_class: String,
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
}

/// Per-class probabilities, kept in class index order.
///
/// Serializes as a JSON object whose keys appear in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassProbabilities(Vec<(String, f32)>);

impl ClassProbabilities {
    pub fn get(&self, class: &str) -> Option<f32> {
        self.0
            .iter()
            .find(|(name, _)| name == class)
            .map(|(_, probability)| *probability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.0.iter().map(|(name, probability)| (name.as_str(), *probability))
    }
}

impl FromIterator<(String, f32)> for ClassProbabilities {
    fn from_iter<I: IntoIterator<Item = (String, f32)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, probability) in self.iter() {
            map.serialize_entry(name, &probability)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ClassProbabilities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProbabilitiesVisitor;

        impl<'de> Visitor<'de> for ProbabilitiesVisitor {
            type Value = ClassProbabilities;

            fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
                f.write_str("an object mapping class names to probabilities")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> Result<ClassProbabilities, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, f32>()? {
                    entries.push(entry);
                }
                Ok(ClassProbabilities(entries))
            }
        }

        deserializer.deserialize_map(ProbabilitiesVisitor)
    }
}

impl PredictionResult {
    /// Shapes a probability vector into a response using the label map.
    pub fn from_probabilities(
        labels: &LabelMap,
        probabilities: &[f32],
    ) -> Result<Self, ServeError> {
        if probabilities.len() != labels.len() {
            return Err(ServeError::OutputMismatch {
                expected: labels.len(),
                actual: probabilities.len(),
            });
        }

        let predicted = argmax(probabilities);
        let confidence = probabilities[predicted];
        let predicted_class = labels
            .get(predicted)
            .ok_or_else(|| ServeError::Internal(format!("No label for class {predicted}")))?
            .to_string();
        let probabilities = labels
            .iter()
            .map(|(index, name)| (name.to_string(), probabilities[index]))
            .collect();

        Ok(Self {
            predicted_class,
            confidence,
            probabilities,
        })
    }
}

/// Index of the largest value. The lowest index wins exact ties and NaN never wins.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (index, value) in values.iter().enumerate().skip(1) {
        if *value > values[best] || (values[best].is_nan() && !value.is_nan()) {
            best = index;
        }
    }
    best
}

/// Runs the full request lifecycle: warm-up, preprocessing, forward pass, response shaping.
#[derive(Clone)]
pub struct InferenceService {
    cache: Arc<ModelCache>,
}

impl InferenceService {
    pub fn new(cache: Arc<ModelCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Classifies one uploaded image. Blocking: call it from a blocking thread.
    pub fn infer(&self, image_bytes: &[u8]) -> Result<PredictionResult, ServeError> {
        let model = self.cache.ensure_loaded()?;
        let input = preprocess(image_bytes)?;
        let probabilities = model.classifier.predict(input)?;
        PredictionResult::from_probabilities(&model.labels, &probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::CountingLoader;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;

    fn labels(names: &[&str]) -> LabelMap {
        LabelMap::new(names.iter().copied()).unwrap()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 10, 10])));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn argmax_prefers_the_lowest_index_on_ties() {
        assert_eq!(argmax(&[0.2, 0.8]), 1);
        assert_eq!(argmax(&[0.4, 0.4, 0.2]), 0);
        assert_eq!(argmax(&[0.1, 0.45, 0.45]), 1);
        assert_eq!(argmax(&[f32::NAN, 0.3, 0.7]), 2);
        assert_eq!(argmax(&[0.3, f32::NAN, 0.2]), 0);
    }

    #[test]
    fn result_pairs_every_label_with_its_probability() {
        let labels = labels(&["benign", "malignant", "nevus"]);
        let result = PredictionResult::from_probabilities(&labels, &[0.1, 0.3, 0.6]).unwrap();

        assert_eq!(result.predicted_class, "nevus");
        assert_eq!(result.confidence, 0.6);
        assert_eq!(result.probabilities.len(), 3);
        assert_eq!(result.probabilities.get("benign"), Some(0.1));
        assert_eq!(result.probabilities.get("melanoma"), None);
        let sum: f32 = result.probabilities.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-3);
    }

    #[test]
    fn probabilities_serialize_in_class_index_order() {
        let labels = labels(&["nevus", "melanoma", "benign"]);
        let result = PredictionResult::from_probabilities(&labels, &[0.25, 0.5, 0.25]).unwrap();

        let json = serde_json::to_string(&result).unwrap();

        assert_eq!(
            json,
            r#"{"predicted_class":"melanoma","confidence":0.5,"probabilities":{"nevus":0.25,"melanoma":0.5,"benign":0.25}}"#
        );
        let restored: PredictionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, result);
    }

    #[test]
    fn result_rejects_output_of_the_wrong_width() {
        let labels = labels(&["benign", "malignant"]);
        let err = PredictionResult::from_probabilities(&labels, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            ServeError::OutputMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn infer_runs_the_whole_pipeline() {
        let loader = CountingLoader::new(vec!["benign", "malignant"], vec![0.2, 0.8]);
        let loads = loader.loads.clone();
        let service = InferenceService::new(Arc::new(ModelCache::new(loader)));

        let first = service.infer(&png(10, 10)).unwrap();
        let second = service.infer(&png(500, 20)).unwrap();

        assert_eq!(first.predicted_class, "malignant");
        assert_eq!(first.confidence, 0.8);
        assert_eq!(first, second);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn infer_surfaces_decode_failures() {
        let loader = CountingLoader::new(vec!["benign", "malignant"], vec![0.2, 0.8]);
        let service = InferenceService::new(Arc::new(ModelCache::new(loader)));

        let err = service.infer(b"GIF89a but not really").unwrap_err();
        assert!(matches!(err, ServeError::Decode(_)));
    }
}
