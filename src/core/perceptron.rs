use crate::prng::Prng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Delta-rule step size for the output layer.
const OUTPUT_RATE: f64 = 0.2;
/// Delta-rule step size for hidden layers. Intentionally fixed, not a
/// learning-rate schedule.
const HIDDEN_RATE: f64 = 0.19;

/// A small feed-forward function approximator.
///
/// Sigmoid activation at every layer including the output, weights drawn
/// uniformly from [-1, 1]. `evaluate` is a single forward pass; `train`
/// performs one backward pass with fixed, layer-dependent step sizes.
///
/// Layer sizes and weights serialize (serde), so a learner backed by
/// perceptrons can be suspended and resumed.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Perceptron {
    /// Unit counts per layer, input layer first, single output unit last.
    layer_sizes: Vec<usize>,
    /// `weights[l][j][k]`: weight from unit `k` of layer `l` to unit `j`
    /// of layer `l + 1`.
    weights: Vec<Vec<Vec<f64>>>,
}

impl Perceptron {
    /// Build a network with the given layer sizes (at least input and
    /// output). The final layer must hold exactly one unit.
    pub fn new(layer_sizes: &[usize], rng: &mut Prng) -> Self {
        assert!(layer_sizes.len() >= 2, "need at least input and output layers");
        assert_eq!(*layer_sizes.last().unwrap(), 1, "output layer must be scalar");
        assert!(layer_sizes.iter().all(|&n| n > 0), "empty layers are not allowed");

        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        for l in 1..layer_sizes.len() {
            let mut layer = Vec::with_capacity(layer_sizes[l]);
            for _ in 0..layer_sizes[l] {
                let mut into_unit = Vec::with_capacity(layer_sizes[l - 1]);
                for _ in 0..layer_sizes[l - 1] {
                    into_unit.push(rng.gen_range_f64(-1.0, 1.0));
                }
                layer.push(into_unit);
            }
            weights.push(layer);
        }

        Self {
            layer_sizes: layer_sizes.to_vec(),
            weights,
        }
    }

    pub fn input_len(&self) -> usize {
        self.layer_sizes[0]
    }

    pub fn layer_sizes(&self) -> &[usize] {
        &self.layer_sizes
    }

    /// Single forward pass; the scalar output lies in (0, 1) scaled by the
    /// caller if a different codomain is needed.
    pub fn evaluate(&self, input: &[f64]) -> f64 {
        let activations = self.forward(input);
        activations[self.weights.len()][0]
    }

    /// One backward pass of the delta rule toward `target`.
    pub fn train(&mut self, input: &[f64], target: f64) {
        let activations = self.forward(input);
        let n_weight_layers = self.weights.len();

        // deltas[l] pairs with weights[l] (i.e. layer l + 1's units).
        let mut deltas: Vec<Vec<f64>> = self
            .layer_sizes
            .iter()
            .skip(1)
            .map(|&n| vec![0.0; n])
            .collect();

        // Output layer.
        let out = activations[n_weight_layers][0];
        deltas[n_weight_layers - 1][0] = out * (1.0 - out) * (target - out);
        for k in 0..self.layer_sizes[n_weight_layers - 1] {
            self.weights[n_weight_layers - 1][0][k] +=
                OUTPUT_RATE * deltas[n_weight_layers - 1][0] * activations[n_weight_layers - 1][k];
        }

        // Hidden layers, back to front.
        for l in (1..n_weight_layers).rev() {
            for j in 0..self.layer_sizes[l] {
                let mut sum = 0.0;
                for upper in 0..self.layer_sizes[l + 1] {
                    sum += HIDDEN_RATE * self.weights[l][upper][j] * deltas[l][upper];
                }
                let a = activations[l][j];
                deltas[l - 1][j] = a * (1.0 - a) * sum;
                for k in 0..self.layer_sizes[l - 1] {
                    self.weights[l - 1][j][k] +=
                        HIDDEN_RATE * deltas[l - 1][j] * activations[l - 1][k];
                }
            }
        }
    }

    fn forward(&self, input: &[f64]) -> Vec<Vec<f64>> {
        assert_eq!(input.len(), self.layer_sizes[0], "input width mismatch");

        let mut activations: Vec<Vec<f64>> = Vec::with_capacity(self.layer_sizes.len());
        activations.push(input.to_vec());

        for l in 0..self.weights.len() {
            let prev = &activations[l];
            let mut next = Vec::with_capacity(self.layer_sizes[l + 1]);
            for into_unit in &self.weights[l] {
                let mut acc = 0.0;
                for (k, w) in into_unit.iter().enumerate() {
                    acc += w * prev[k];
                }
                next.push(sigmoid(acc));
            }
            activations.push(next);
        }

        activations
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(sizes: &[usize], seed: u64) -> Perceptron {
        let mut rng = Prng::new(seed);
        Perceptron::new(sizes, &mut rng)
    }

    #[test]
    fn output_is_a_probability_like_scalar() {
        let p = net(&[6, 6, 1], 1);
        let out = p.evaluate(&[0.0, 0.5, 1.0, 0.25, 0.75, 0.1]);
        assert!(out > 0.0 && out < 1.0);
    }

    #[test]
    fn training_moves_output_toward_target() {
        let mut p = net(&[4, 5, 1], 3);
        let input = [0.1, 0.9, 0.4, 0.6];

        let before = p.evaluate(&input);
        for _ in 0..200 {
            p.train(&input, 1.0);
        }
        let after = p.evaluate(&input);

        assert!(after > before, "expected {after} > {before}");
        assert!((1.0 - after) < (1.0 - before));
    }

    #[test]
    fn training_can_also_pull_downward() {
        let mut p = net(&[3, 4, 1], 9);
        let input = [0.8, 0.2, 0.5];

        for _ in 0..200 {
            p.train(&input, 0.0);
        }
        assert!(p.evaluate(&input) < 0.5);
    }

    #[test]
    fn same_seed_builds_identical_networks() {
        let a = net(&[5, 8, 1], 42);
        let b = net(&[5, 8, 1], 42);
        let input = [0.2, 0.4, 0.6, 0.8, 1.0];
        assert_eq!(a.evaluate(&input), b.evaluate(&input));
    }

    #[test]
    fn deep_network_trains_without_panicking() {
        let mut p = net(&[6, 16, 8, 4, 1], 5);
        let input = [0.3; 6];
        for _ in 0..50 {
            p.train(&input, 0.7);
        }
        let out = p.evaluate(&input);
        assert!(out.is_finite());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serialization_roundtrip_preserves_behavior() {
        let p = net(&[6, 6, 1], 11);
        let json = serde_json::to_string(&p).unwrap();
        let q: Perceptron = serde_json::from_str(&json).unwrap();

        let input = [0.9, 0.1, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(p.evaluate(&input), q.evaluate(&input));
        assert_eq!(p.layer_sizes(), q.layer_sizes());
    }
}
