//! Feature encoding: `[size, dex_count] ++ one-hot(permissions)` in vocabulary order.

use ndarray::Array1;

use crate::apk::RawFeatures;
use crate::vocabulary::{PermissionVocabulary, NUMERIC_COLUMNS};

/// Fixed-width model input.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedInput {
    values: Array1<f32>,
}

impl EncodedInput {
    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            values: Array1::from(values),
        }
    }

    pub fn values(&self) -> &Array1<f32> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Encode extracted features against `vocabulary`.
///
/// Total over any input: permissions missing from the vocabulary are
/// dropped without error, so the width is always `2 + vocabulary.len()`.
pub fn encode(features: &RawFeatures, vocabulary: &PermissionVocabulary) -> EncodedInput {
    let mut values = Array1::<f32>::zeros(vocabulary.width());
    values[0] = features.size as f32;
    values[1] = features.dex_count as f32;

    for permission in &features.permissions {
        if let Some(pos) = vocabulary.position(permission) {
            values[NUMERIC_COLUMNS + pos] = 1.0;
        }
    }

    EncodedInput { values }
}
