//! Feed-forward network loaded from a JSON weight export.
//!
//! Layout mirrors Keras `Dense` layers: `weights` is `input x output`,
//! `bias` has one entry per output unit. The final layer must have a single
//! unit and should end in a sigmoid so scores land in `[0, 1]`.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView2};
use serde::Deserialize;
use tracing::info;

use super::{check_input_width, check_scores, Classifier};
use crate::error::{ArtifactLoadError, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    #[default]
    Linear,
}

impl Activation {
    fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Linear => x,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NetworkFile {
    input_dim: usize,
    layers: Vec<LayerFile>,
}

#[derive(Debug, Deserialize)]
struct LayerFile {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default)]
    activation: Activation,
}

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Array2<f32>,
    bias: Array1<f32>,
    activation: Activation,
}

#[derive(Debug, Clone)]
pub struct DenseNetwork {
    input_dim: usize,
    layers: Vec<DenseLayer>,
}

impl DenseNetwork {
    pub fn load(path: &Path) -> Result<Self, ArtifactLoadError> {
        let data = fs::read_to_string(path).map_err(|source| ArtifactLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file: NetworkFile =
            serde_json::from_str(&data).map_err(|source| ArtifactLoadError::Json {
                path: path.to_path_buf(),
                source,
            })?;

        let network =
            Self::from_file(file).map_err(|reason| ArtifactLoadError::invalid(path, reason))?;
        info!(
            path = %path.display(),
            input_dim = network.input_dim,
            layers = network.layers.len(),
            "loaded dense classifier"
        );
        Ok(network)
    }

    fn from_file(file: NetworkFile) -> Result<Self, String> {
        if file.layers.is_empty() {
            return Err("network has no layers".into());
        }

        let mut fan_in = file.input_dim;
        let mut layers = Vec::with_capacity(file.layers.len());
        for (i, layer) in file.layers.into_iter().enumerate() {
            if layer.weights.len() != fan_in {
                return Err(format!(
                    "layer {i}: weights have {} rows, expected {fan_in}",
                    layer.weights.len()
                ));
            }
            let fan_out = layer.bias.len();
            if fan_out == 0 {
                return Err(format!("layer {i}: no units"));
            }
            if let Some(row) = layer.weights.iter().position(|r| r.len() != fan_out) {
                return Err(format!("layer {i}: weight row {row} does not match {fan_out} units"));
            }

            let flat: Vec<f32> = layer.weights.into_iter().flatten().collect();
            let weights = Array2::from_shape_vec((fan_in, fan_out), flat)
                .map_err(|e| format!("layer {i}: {e}"))?;
            layers.push(DenseLayer {
                weights,
                bias: Array1::from(layer.bias),
                activation: layer.activation,
            });
            fan_in = fan_out;
        }

        if fan_in != 1 {
            return Err(format!("output layer has {fan_in} units, expected 1"));
        }

        Ok(Self {
            input_dim: file.input_dim,
            layers,
        })
    }

    fn forward(&self, rows: ArrayView2<'_, f32>) -> Array2<f32> {
        let mut h = rows.to_owned();
        for layer in &self.layers {
            h = h.dot(&layer.weights) + &layer.bias;
            let activation = layer.activation;
            h.mapv_inplace(|x| activation.apply(x));
        }
        h
    }
}

impl Classifier for DenseNetwork {
    fn input_width(&self) -> Option<usize> {
        Some(self.input_dim)
    }

    fn predict_batch(&self, rows: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError> {
        check_input_width(self.input_dim, &rows)?;
        let scores = self.forward(rows).column(0).to_vec();
        check_scores(&scores, rows.nrows())?;
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodedInput;
    use crate::testing::write_temp;
    use ndarray::array;
    use serde_json::json;

    fn write_network(value: serde_json::Value) -> tempfile::NamedTempFile {
        write_temp(".json", value.to_string().as_bytes())
    }

    #[test]
    fn two_layer_network_scores_rows() {
        let tmp = write_network(json!({
            "input_dim": 3,
            "layers": [
                {
                    "weights": [[1.0, 0.0], [0.0, 1.0], [1.0, -1.0]],
                    "bias": [0.0, 0.5],
                    "activation": "relu"
                },
                {"weights": [[1.0], [-2.0]], "bias": [0.0], "activation": "sigmoid"}
            ]
        }));
        let net = DenseNetwork::load(tmp.path()).unwrap();
        assert_eq!(net.input_width(), Some(3));

        // row 0: hidden = relu([1+0+1, 0+0-1+0.5]) = [2, 0]; out = sigmoid(2)
        // row 1: hidden = relu([0, 0.5]) = [0, 0.5]; out = sigmoid(-1)
        let scores = net
            .predict_batch(array![[1.0, 0.0, 1.0], [0.0, 0.0, 0.0]].view())
            .unwrap();
        let sigmoid = |x: f32| 1.0 / (1.0 + (-x).exp());
        assert!((scores[0] - sigmoid(2.0)).abs() < 1e-6);
        assert!((scores[1] - sigmoid(-1.0)).abs() < 1e-6);
    }

    #[test]
    fn width_mismatch_is_a_model_error() {
        let tmp = write_network(json!({
            "input_dim": 2,
            "layers": [{"weights": [[0.5], [0.5]], "bias": [0.0], "activation": "sigmoid"}]
        }));
        let net = DenseNetwork::load(tmp.path()).unwrap();

        let err = net.predict(&EncodedInput::from_vec(vec![1.0, 2.0, 3.0])).unwrap_err();
        assert!(matches!(err, ModelError::InputWidth { expected: 2, actual: 3 }));
    }

    #[test]
    fn linear_output_outside_unit_interval_is_rejected() {
        let tmp = write_network(json!({
            "input_dim": 1,
            "layers": [{"weights": [[2.0]], "bias": [0.0]}]
        }));
        let net = DenseNetwork::load(tmp.path()).unwrap();

        assert!(net.predict(&EncodedInput::from_vec(vec![0.25])).is_ok());
        assert!(matches!(
            net.predict(&EncodedInput::from_vec(vec![3.0])),
            Err(ModelError::ScoreOutOfRange(_))
        ));
    }

    #[test]
    fn malformed_networks_fail_to_load() {
        let cases = [
            json!({"input_dim": 2, "layers": []}),
            json!({"input_dim": 2, "layers": [{"weights": [[1.0]], "bias": [0.0]}]}),
            json!({"input_dim": 1, "layers": [{"weights": [[1.0, 2.0]], "bias": [0.0, 0.0]}]}),
            json!({"input_dim": 1, "layers": [{"weights": [[1.0, 2.0]], "bias": [0.0]}]}),
        ];
        for case in cases {
            let tmp = write_network(case.clone());
            assert!(
                matches!(DenseNetwork::load(tmp.path()), Err(ArtifactLoadError::Invalid { .. })),
                "expected invalid artifact for {case}"
            );
        }

        let tmp = write_network(json!({
            "input_dim": 1,
            "layers": [{"weights": [[1.0]], "bias": [0.0], "activation": "gelu"}]
        }));
        assert!(matches!(DenseNetwork::load(tmp.path()), Err(ArtifactLoadError::Json { .. })));
    }
}
