//! Permission vocabulary: the ordered permission columns the classifier was trained on.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::ArtifactLoadError;

/// Name of the package-size column.
pub const SIZE_COLUMN: &str = "size";
/// Name of the dex-container-count column.
pub const DEX_COUNT_COLUMN: &str = "dex_count";
/// Number of numeric columns that precede the permission indicators.
pub const NUMERIC_COLUMNS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidVocabulary {
    #[error("entry {0} is empty")]
    EmptyEntry(usize),
    #[error("duplicate entry {0:?}")]
    Duplicate(String),
}

#[derive(Debug, Deserialize)]
struct VocabularyFile {
    classes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PermissionVocabulary {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl PermissionVocabulary {
    pub fn new(classes: Vec<String>) -> Result<Self, InvalidVocabulary> {
        let mut index = HashMap::with_capacity(classes.len());
        for (i, class) in classes.iter().enumerate() {
            if class.trim().is_empty() {
                return Err(InvalidVocabulary::EmptyEntry(i));
            }
            if index.insert(class.clone(), i).is_some() {
                return Err(InvalidVocabulary::Duplicate(class.clone()));
            }
        }
        Ok(Self { classes, index })
    }

    /// Load a vocabulary from a JSON file of the form `{"classes": [...]}`.
    pub fn load(path: &Path) -> Result<Self, ArtifactLoadError> {
        let data = fs::read_to_string(path).map_err(|source| ArtifactLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: VocabularyFile =
            serde_json::from_str(&data).map_err(|source| ArtifactLoadError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let vocabulary =
            Self::new(file.classes).map_err(|e| ArtifactLoadError::invalid(path, e.to_string()))?;
        if vocabulary.is_empty() {
            warn!(path = %path.display(), "permission vocabulary is empty");
        }
        info!(
            path = %path.display(),
            permissions = vocabulary.len(),
            "loaded permission vocabulary"
        );
        Ok(vocabulary)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Column offset of `permission` within the permission block.
    pub fn position(&self, permission: &str) -> Option<usize> {
        self.index.get(permission).copied()
    }

    /// Width of an encoded input: the numeric columns plus one per permission.
    pub fn width(&self) -> usize {
        NUMERIC_COLUMNS + self.classes.len()
    }

    /// Column names in encoded order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width());
        names.push(SIZE_COLUMN.to_string());
        names.push(DEX_COUNT_COLUMN.to_string());
        names.extend(self.classes.iter().cloned());
        names
    }
}
