//! Obfuscation classifier: a pre-trained scoring function behind a narrow trait.
//!
//! Two backends:
//! - [`DenseNetwork`]: a feed-forward network exported to JSON (always available)
//! - `OnnxClassifier`: any ONNX graph via ONNX Runtime (`onnx` feature)

mod dense;
#[cfg(feature = "onnx")]
mod onnx;

use std::fmt;
use std::path::Path;

use ndarray::{ArrayView2, Axis};
use serde::Serialize;

use crate::encoder::EncodedInput;
use crate::error::{ArtifactLoadError, ModelError};

pub use dense::{Activation, DenseNetwork};
#[cfg(feature = "onnx")]
pub use onnx::OnnxClassifier;

/// Scores strictly above this are labelled obfuscated.
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Obfuscated,
    NotObfuscated,
}

impl Verdict {
    pub fn from_probability(p: f32) -> Self {
        if p > DECISION_THRESHOLD {
            Verdict::Obfuscated
        } else {
            Verdict::NotObfuscated
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Obfuscated => "Obfuscated",
            Verdict::NotObfuscated => "Not Obfuscated",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Probability that a package is obfuscated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    pub probability: f32,
}

impl Prediction {
    pub fn new(probability: f32) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ModelError::ScoreOutOfRange(probability));
        }
        Ok(Self { probability })
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_probability(self.probability)
    }

    /// Confidence in the verdict as a percentage, always in `[50, 100]`.
    pub fn confidence(&self) -> f32 {
        if self.probability > DECISION_THRESHOLD {
            self.probability * 100.0
        } else {
            (1.0 - self.probability) * 100.0
        }
    }
}

pub trait Classifier: Send + Sync {
    /// Number of input columns the model accepts, when the backend knows it.
    fn input_width(&self) -> Option<usize>;

    /// Score every row of `rows`; one probability per row.
    fn predict_batch(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError>;

    fn predict(&self, input: &EncodedInput) -> Result<Prediction, ModelError> {
        let row = input.values().view().insert_axis(Axis(0));
        match self.predict_batch(row)?.as_slice() {
            [p] => Prediction::new(*p),
            other => Err(ModelError::OutputShape {
                expected: 1,
                actual: other.len(),
            }),
        }
    }
}

/// Reject inputs whose width differs from what the model was built for.
pub(crate) fn check_input_width(
    expected: usize,
    rows: &ArrayView2<'_, f32>,
) -> Result<(), ModelError> {
    if rows.ncols() != expected {
        return Err(ModelError::InputWidth {
            expected,
            actual: rows.ncols(),
        });
    }
    Ok(())
}

/// Reject output batches of the wrong length or with scores outside `[0, 1]`.
pub(crate) fn check_scores(scores: &[f32], rows: usize) -> Result<(), ModelError> {
    if scores.len() != rows {
        return Err(ModelError::OutputShape {
            expected: rows,
            actual: scores.len(),
        });
    }
    if let Some(&bad) = scores.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(ModelError::ScoreOutOfRange(bad));
    }
    Ok(())
}

/// Load a classifier artifact, choosing the backend by file extension.
///
/// `input_width` is the encoded width implied by the vocabulary; backends
/// that cannot report their own input shape are bound to it.
pub fn load_classifier(
    path: &Path,
    #[cfg_attr(not(feature = "onnx"), allow(unused_variables))] input_width: usize,
) -> Result<Box<dyn Classifier>, ArtifactLoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("json") => Ok(Box::new(DenseNetwork::load(path)?)),
        #[cfg(feature = "onnx")]
        Some("onnx") => Ok(Box::new(OnnxClassifier::load(path, input_width)?)),
        #[cfg(not(feature = "onnx"))]
        Some("onnx") => Err(ArtifactLoadError::invalid(
            path,
            "ONNX models need a build with the `onnx` feature",
        )),
        _ => Err(ArtifactLoadError::UnsupportedModel {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_temp, FnClassifier};

    #[test]
    fn strict_threshold_tie_break() {
        assert_eq!(Verdict::from_probability(0.5), Verdict::NotObfuscated);
        assert_eq!(Verdict::from_probability(0.500_001), Verdict::Obfuscated);
        assert_eq!(Verdict::from_probability(0.0), Verdict::NotObfuscated);
        assert_eq!(Verdict::from_probability(1.0), Verdict::Obfuscated);
    }

    #[test]
    fn confidence_matches_verdict_side() {
        let p = Prediction::new(0.82).unwrap();
        assert_eq!(p.verdict(), Verdict::Obfuscated);
        assert_eq!(format!("{:.2}", p.confidence()), "82.00");

        let p = Prediction::new(0.2).unwrap();
        assert_eq!(p.verdict(), Verdict::NotObfuscated);
        assert_eq!(format!("{:.2}", p.confidence()), "80.00");

        let p = Prediction::new(0.5).unwrap();
        assert_eq!(p.verdict(), Verdict::NotObfuscated);
        assert_eq!(p.confidence(), 50.0);
    }

    #[test]
    fn confidence_is_always_between_50_and_100() {
        for i in 0..=1000 {
            let c = Prediction::new(i as f32 / 1000.0).unwrap().confidence();
            assert!((50.0..=100.0).contains(&c), "confidence {c} out of range");
        }
    }

    #[test]
    fn prediction_rejects_out_of_range_scores() {
        assert!(matches!(Prediction::new(1.5), Err(ModelError::ScoreOutOfRange(_))));
        assert!(matches!(Prediction::new(-0.1), Err(ModelError::ScoreOutOfRange(_))));
        assert!(matches!(Prediction::new(f32::NAN), Err(ModelError::ScoreOutOfRange(_))));
    }

    #[test]
    fn default_predict_uses_single_row_batch() {
        let model = FnClassifier::new(3, |row| row.sum() / 10.0);
        let input = EncodedInput::from_vec(vec![1.0, 2.0, 3.0]);
        assert!((model.predict(&input).unwrap().probability - 0.6).abs() < 1e-6);
    }

    #[test]
    fn labels() {
        assert_eq!(Verdict::Obfuscated.to_string(), "Obfuscated");
        assert_eq!(Verdict::NotObfuscated.to_string(), "Not Obfuscated");
    }

    #[test]
    fn unknown_model_extension_is_rejected() {
        let tmp = write_temp(".h5", b"\x89HDF");
        assert!(matches!(
            load_classifier(tmp.path(), 4),
            Err(ArtifactLoadError::UnsupportedModel { .. })
        ));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn onnx_without_feature_is_an_artifact_error() {
        let tmp = write_temp(".onnx", b"\x08\x07");
        assert!(matches!(
            load_classifier(tmp.path(), 4),
            Err(ArtifactLoadError::Invalid { .. })
        ));
    }
}
