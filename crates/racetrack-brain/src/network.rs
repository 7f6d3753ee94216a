//! Fully-connected feed-forward controller with saturating linear units.

use rand::{Rng, RngCore};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structural and evaluation errors for [`Network`].
#[derive(Debug, Error, PartialEq)]
pub enum NetworkError {
    #[error("input count must be non-zero")]
    ZeroInputs,
    #[error("output count must be non-zero")]
    ZeroOutputs,
    #[error("hidden layer {layer} has zero neurons")]
    ZeroSizedHidden { layer: usize },
    #[error("weight tensor has {actual} layers, topology requires {expected}")]
    LayerCount { expected: usize, actual: usize },
    #[error("layer {layer} has {actual} neurons, topology requires {expected}")]
    NeuronCount {
        layer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("layer {layer} neuron {neuron} has {actual} weights, expected {expected} (inputs + bias)")]
    RowLength {
        layer: usize,
        neuron: usize,
        expected: usize,
        actual: usize,
    },
    #[error("layer {layer} neuron {neuron} weight {index} is not finite")]
    NonFiniteWeight {
        layer: usize,
        neuron: usize,
        index: usize,
    },
    #[error("network expects {expected} inputs, got {actual}")]
    InputLength { expected: usize, actual: usize },
}

/// Feed-forward network: `weights[layer][neuron][input]`, last entry of each row is the bias.
///
/// Networks are values. Mutation produces a new network and never edits one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NetworkRecord")]
pub struct Network {
    inputs: usize,
    hidden: Vec<usize>,
    outputs: usize,
    weights: Vec<Vec<Vec<f32>>>,
}

/// Unvalidated wire form; deserialization always goes through [`Network::new`].
#[derive(Deserialize)]
struct NetworkRecord {
    inputs: usize,
    hidden: Vec<usize>,
    outputs: usize,
    weights: Vec<Vec<Vec<f32>>>,
}

impl TryFrom<NetworkRecord> for Network {
    type Error = NetworkError;

    fn try_from(record: NetworkRecord) -> Result<Self, Self::Error> {
        Network::new(record.inputs, record.hidden, record.outputs, record.weights)
    }
}

impl Network {
    /// Build a network from an explicit weight tensor, rejecting any shape mismatch.
    pub fn new(
        inputs: usize,
        hidden: Vec<usize>,
        outputs: usize,
        weights: Vec<Vec<Vec<f32>>>,
    ) -> Result<Self, NetworkError> {
        let network = Self {
            inputs,
            hidden,
            outputs,
            weights,
        };
        network.validate()?;
        Ok(network)
    }

    /// Network with weights drawn uniformly from `[-1, 1]`.
    pub fn random(
        inputs: usize,
        hidden: Vec<usize>,
        outputs: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Self, NetworkError> {
        check_topology(inputs, &hidden, outputs)?;
        let layer_count = hidden.len() + 1;
        let mut weights = Vec::with_capacity(layer_count);
        for layer in 0..layer_count {
            let fan_in = layer_in_size(inputs, &hidden, layer);
            let fan_out = layer_out_size(&hidden, outputs, layer);
            let rows: Vec<Vec<f32>> = (0..fan_out)
                .map(|_| (0..=fan_in).map(|_| rng.random_range(-1.0..=1.0)).collect())
                .collect();
            weights.push(rows);
        }
        Self::new(inputs, hidden, outputs, weights)
    }

    /// Check the weight tensor against `(inputs, hidden, outputs)`.
    pub fn validate(&self) -> Result<(), NetworkError> {
        check_topology(self.inputs, &self.hidden, self.outputs)?;
        let expected_layers = self.hidden.len() + 1;
        if self.weights.len() != expected_layers {
            return Err(NetworkError::LayerCount {
                expected: expected_layers,
                actual: self.weights.len(),
            });
        }
        for (layer, rows) in self.weights.iter().enumerate() {
            let expected_rows = layer_out_size(&self.hidden, self.outputs, layer);
            if rows.len() != expected_rows {
                return Err(NetworkError::NeuronCount {
                    layer,
                    expected: expected_rows,
                    actual: rows.len(),
                });
            }
            let expected_len = layer_in_size(self.inputs, &self.hidden, layer) + 1;
            for (neuron, row) in rows.iter().enumerate() {
                if row.len() != expected_len {
                    return Err(NetworkError::RowLength {
                        layer,
                        neuron,
                        expected: expected_len,
                        actual: row.len(),
                    });
                }
                if let Some(index) = row.iter().position(|w| !w.is_finite()) {
                    return Err(NetworkError::NonFiniteWeight {
                        layer,
                        neuron,
                        index,
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluate the network. Every neuron output is clamped to `[-1, 1]`.
    pub fn eval(&self, input: &[f32]) -> Result<Vec<f32>, NetworkError> {
        if input.len() != self.inputs {
            return Err(NetworkError::InputLength {
                expected: self.inputs,
                actual: input.len(),
            });
        }
        let mut current: Vec<f32> = input.to_vec();
        let mut next = Vec::new();
        for rows in &self.weights {
            next.clear();
            for row in rows {
                let (weights, bias) = row.split_at(row.len() - 1);
                let sum = weights
                    .iter()
                    .zip(&current)
                    .fold(bias[0], |acc, (w, x)| acc + w * x);
                next.push(saturate(sum));
            }
            std::mem::swap(&mut current, &mut next);
        }
        Ok(current)
    }

    /// New network with every weight (biases included) perturbed by `N(0, stdev)`.
    ///
    /// `stdev == 0` yields an exact copy.
    #[must_use]
    pub fn random_step(&self, stdev: f32, rng: &mut dyn RngCore) -> Self {
        if !(stdev.is_finite() && stdev > 0.0) {
            return self.clone();
        }
        let Ok(normal) = Normal::new(0.0_f32, stdev) else {
            return self.clone();
        };
        let mut child = self.clone();
        for weight in child.weights.iter_mut().flatten().flatten() {
            *weight += normal.sample(rng);
        }
        child
    }

    #[must_use]
    pub fn input_count(&self) -> usize {
        self.inputs
    }

    #[must_use]
    pub fn output_count(&self) -> usize {
        self.outputs
    }

    #[must_use]
    pub fn hidden(&self) -> &[usize] {
        &self.hidden
    }

    #[must_use]
    pub fn weights(&self) -> &[Vec<Vec<f32>>] {
        &self.weights
    }

    /// Total number of weights including biases.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.weights.iter().flatten().map(Vec::len).sum()
    }
}

fn check_topology(inputs: usize, hidden: &[usize], outputs: usize) -> Result<(), NetworkError> {
    if inputs == 0 {
        return Err(NetworkError::ZeroInputs);
    }
    if outputs == 0 {
        return Err(NetworkError::ZeroOutputs);
    }
    if let Some(layer) = hidden.iter().position(|&size| size == 0) {
        return Err(NetworkError::ZeroSizedHidden { layer });
    }
    Ok(())
}

fn layer_in_size(inputs: usize, hidden: &[usize], layer: usize) -> usize {
    if layer == 0 { inputs } else { hidden[layer - 1] }
}

fn layer_out_size(hidden: &[usize], outputs: usize, layer: usize) -> usize {
    hidden.get(layer).copied().unwrap_or(outputs)
}

fn saturate(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}
