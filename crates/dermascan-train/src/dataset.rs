use std::path::{Path, PathBuf};

use dermascan_model::LabelMap;
use walkdir::WalkDir;

use crate::error::TrainError;

pub const IMAGE_EXTENSIONS: &[&str] = &["bmp", "gif", "jpeg", "jpg", "png", "tif", "tiff", "webp"];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// Images laid out as `<root>/<class name>/**/<image>`.
///
/// Classes are the immediate sub-directories of the root sorted by name, so the label of a
/// class is its position in that order.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    items: Vec<ImageItem>,
}

impl ImageFolder {
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, TrainError> {
        let root = root.as_ref();
        let entries = std::fs::read_dir(root).map_err(|e| TrainError::io(root, e))?;

        let mut class_dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| TrainError::io(root, e))?;
            if entry.path().is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                class_dirs.push((name, entry.path()));
            }
        }
        class_dirs.sort_by(|a, b| a.0.cmp(&b.0));

        if class_dirs.is_empty() {
            return Err(TrainError::dataset(format!(
                "{} has no class directories",
                root.display()
            )));
        }

        let mut items = Vec::new();
        for (label, (name, dir)) in class_dirs.iter().enumerate() {
            let before = items.len();
            for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
                let entry = entry.map_err(|e| TrainError::dataset(e.to_string()))?;
                if entry.file_type().is_file() && is_image(entry.path()) {
                    items.push(ImageItem {
                        path: entry.into_path(),
                        label,
                    });
                }
            }
            if items.len() == before {
                log::warn!("Class '{name}' in {} has no images", root.display());
            }
        }

        if items.is_empty() {
            return Err(TrainError::dataset(format!(
                "{} contains no images",
                root.display()
            )));
        }

        Ok(Self {
            root: root.to_path_buf(),
            classes: class_dirs.into_iter().map(|(name, _)| name).collect(),
            items,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn label_map(&self) -> Result<LabelMap, TrainError> {
        LabelMap::new(self.classes.iter().cloned())
            .map_err(|e| TrainError::dataset(format!("{}: {e}", self.root.display())))
    }

    /// Fails unless `other` discovered the same classes in the same order.
    pub fn ensure_same_classes(&self, other: &ImageFolder) -> Result<(), TrainError> {
        if self.classes != other.classes {
            return Err(TrainError::dataset(format!(
                "{} has classes {:?} but {} has {:?}",
                self.root.display(),
                self.classes,
                other.root.display(),
                other.classes
            )));
        }
        Ok(())
    }
}

/// The `train/` and `test/` splits of a data directory.
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: ImageFolder,
    pub test: ImageFolder,
}

impl DataSplits {
    pub fn discover(data_dir: impl AsRef<Path>) -> Result<Self, TrainError> {
        let data_dir = data_dir.as_ref();
        let train = ImageFolder::discover(data_dir.join("train"))?;
        let test = ImageFolder::discover(data_dir.join("test"))?;
        train.ensure_same_classes(&test)?;

        log::info!(
            "Found {} training and {} test images in {} classes",
            train.len(),
            test.len(),
            train.classes().len()
        );
        Ok(Self { train, test })
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
