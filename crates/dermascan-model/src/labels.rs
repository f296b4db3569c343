use std::collections::{BTreeMap, HashSet};
use std::fmt::Formatter;
use std::path::Path;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ArtifactError;

/// Index to class-name lookup table produced by training and read by the server.
///
/// On disk it is a JSON object keyed by the stringified index (`{"0": "melanoma", ...}`).
/// Indices are contiguous from zero and names are unique, so the map lines up one to one
/// with the classifier's output vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    names: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LabelMapError {
    #[error("label map is empty")]
    Empty,
    #[error("label key '{0}' is not a class index")]
    InvalidKey(String),
    #[error("label indices are not contiguous, expected {expected} but found {found}")]
    Gap { expected: usize, found: usize },
    #[error("class name at index {0} is empty")]
    EmptyName(usize),
    #[error("class name '{0}' appears more than once")]
    Duplicate(String),
}

impl LabelMap {
    /// Builds a label map from class names in index order.
    pub fn new<I, S>(names: I) -> Result<Self, LabelMapError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(LabelMapError::Empty);
        }

        let mut seen = HashSet::new();
        for (index, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(LabelMapError::EmptyName(index));
            }
            if !seen.insert(name.as_str()) {
                return Err(LabelMapError::Duplicate(name.clone()));
            }
        }

        Ok(Self { names })
    }

    fn from_entries(entries: BTreeMap<usize, String>) -> Result<Self, LabelMapError> {
        // BTreeMap iterates in key order, so any gap shows up as a key mismatch.
        for (expected, found) in entries.keys().enumerate() {
            if expected != *found {
                return Err(LabelMapError::Gap {
                    expected,
                    found: *found,
                });
            }
        }
        Self::new(entries.into_values())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ArtifactError::from_io(path, e))?;
        let labels: LabelMap =
            serde_json::from_str(&content).map_err(|e| ArtifactError::corrupt(path, e))?;
        log::debug!("Loaded {} labels from {}", labels.len(), path.display());
        Ok(labels)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ArtifactError> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ArtifactError::corrupt(path, e))?;
        std::fs::write(path, content).map_err(|e| ArtifactError::from_io(path, e))
    }
}

impl Serialize for LabelMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.names.len()))?;
        for (index, name) in self.iter() {
            map.serialize_entry(&index.to_string(), name)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for LabelMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LabelMapVisitor;

        impl<'de> Visitor<'de> for LabelMapVisitor {
            type Value = LabelMap;

            fn expecting(&self, f: &mut Formatter) -> std::fmt::Result {
                f.write_str("an object mapping class indices to class names")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<LabelMap, A::Error> {
                let mut entries = BTreeMap::new();
                while let Some((key, name)) = access.next_entry::<String, String>()? {
                    let index = key
                        .parse::<usize>()
                        .map_err(|_| serde::de::Error::custom(LabelMapError::InvalidKey(key)))?;
                    if entries.insert(index, name).is_some() {
                        return Err(serde::de::Error::custom(format!(
                            "label index {index} appears more than once"
                        )));
                    }
                }
                LabelMap::from_entries(entries).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_map(LabelMapVisitor)
    }
}
