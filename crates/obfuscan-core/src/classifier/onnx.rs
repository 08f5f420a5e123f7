//! ONNX model loading and inference via the `ort` crate.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayView2;
use ort::session::Session;
use ort::value::TensorRef;
use tracing::info;

use super::{check_input_width, check_scores, Classifier};
use crate::error::{ArtifactLoadError, ModelError};

/// Classifier backed by an ONNX graph with a `[batch, n]` float input and a
/// `[batch, 1]` probability output (e.g. a Keras model converted with tf2onnx).
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_width: usize,
}

impl OnnxClassifier {
    pub fn load(path: &Path, input_width: usize) -> Result<Self, ArtifactLoadError> {
        let session = Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ArtifactLoadError::invalid(path, e.to_string()))?;

        info!(path = %path.display(), input_width, "loaded ONNX classifier");
        Ok(Self {
            session: Mutex::new(session),
            input_width,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn input_width(&self) -> Option<usize> {
        Some(self.input_width)
    }

    fn predict_batch(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError> {
        check_input_width(self.input_width, &rows)?;

        let input = rows.as_standard_layout().into_owned();
        let input_tensor =
            TensorRef::from_array_view(&input).map_err(|e| ModelError::Backend(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| ModelError::Backend(format!("lock error: {e}")))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ModelError::Backend(e.to_string()))?;

        let scores: Vec<f32> = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| ModelError::Backend(e.to_string()))?
            .iter()
            .copied()
            .collect();

        check_scores(&scores, rows.nrows())?;
        Ok(scores)
    }
}
