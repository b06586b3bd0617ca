//! One-hidden-layer feed-forward controller: ReLU hidden layer, softmax output.
//!
//! Parameters are borrowed from a flat slice laid out as
//! `W_ih (input x hidden) | b_h | W_ho (hidden x output) | b_o`, matrices row-major.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub input: usize,
    pub hidden: usize,
    pub output: usize,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            input: 24,
            hidden: 16,
            output: 4,
        }
    }
}

impl Topology {
    pub const fn new(input: usize, hidden: usize, output: usize) -> Self {
        Self {
            input,
            hidden,
            output,
        }
    }

    pub const fn param_count(&self) -> usize {
        self.input * self.hidden + self.hidden + self.hidden * self.output + self.output
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input == 0 {
            return Err(ConfigError::Zero { name: "network.input" });
        }
        if self.hidden == 0 {
            return Err(ConfigError::Zero { name: "network.hidden" });
        }
        if self.output == 0 {
            return Err(ConfigError::Zero { name: "network.output" });
        }
        Ok(())
    }
}

/// Read-only view of a parameter vector as a network. Cheap to build per call.
#[derive(Debug, Clone, Copy)]
pub struct NeuralController<'a> {
    topology: Topology,
    params: &'a [f32],
}

impl<'a> NeuralController<'a> {
    pub fn new(topology: Topology, params: &'a [f32]) -> Result<Self, ConfigError> {
        topology.validate()?;
        let expected = topology.param_count();
        if params.len() != expected {
            return Err(ConfigError::ParamCount {
                expected,
                got: params.len(),
            });
        }
        Ok(Self { topology, params })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn forward(&self, inputs: &[f32]) -> Result<Vec<f32>, ConfigError> {
        let Topology {
            input,
            hidden,
            output,
        } = self.topology;
        if inputs.len() != input {
            return Err(ConfigError::InputCount {
                expected: input,
                got: inputs.len(),
            });
        }

        let (w_ih, rest) = self.params.split_at(input * hidden);
        let (b_h, rest) = rest.split_at(hidden);
        let (w_ho, b_o) = rest.split_at(hidden * output);

        let mut h = b_h.to_vec();
        for (&x, row) in inputs.iter().zip(w_ih.chunks_exact(hidden)) {
            for (hj, &w) in h.iter_mut().zip(row) {
                *hj += x * w;
            }
        }
        relu(&mut h);

        let mut out = b_o.to_vec();
        for (&x, row) in h.iter().zip(w_ho.chunks_exact(output)) {
            for (oj, &w) in out.iter_mut().zip(row) {
                *oj += x * w;
            }
        }
        softmax(&mut out);
        Ok(out)
    }

    /// Index of the most probable action.
    pub fn decide(&self, inputs: &[f32]) -> Result<usize, ConfigError> {
        Ok(argmax(&self.forward(inputs)?))
    }
}

pub fn relu(xs: &mut [f32]) {
    for x in xs {
        *x = x.max(0.0);
    }
}

pub fn softmax(xs: &mut [f32]) {
    let max = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for x in xs.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    for x in xs.iter_mut() {
        *x /= sum;
    }
}

// ties go to the lowest index
pub fn argmax(xs: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &v) in xs.iter().enumerate() {
        if v > best_v {
            best_v = v;
            best = i;
        }
    }
    best
}
