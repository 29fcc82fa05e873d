use enum_dispatch::enum_dispatch;
use ndarray::{Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::optimizer::{EnumOptimizer, Optimizer};

#[enum_dispatch]
pub trait Layer {
    // computes the output Y of a layer for a given input X
    fn forward_propagation(&self, input: &Array2<f64>) -> Array2<f64>;
    // computes dE/dX for a given dE/dY, given the X seen on the forward pass,
    // and lets the optimizer update parameters starting at `slot`
    fn backward_propagation(
        &mut self,
        input: &Array2<f64>,
        output_error: Array2<f64>,
        optimizer: &mut EnumOptimizer,
        slot: usize,
    ) -> Array2<f64>;
    // number of parameter matrices owned by the layer
    fn parameter_slots(&self) -> usize;
    fn input_size(&self) -> Option<usize>;
    fn output_size(&self) -> Option<usize>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[enum_dispatch(Layer)]
pub enum EnumLayer {
    DenseLayer(DenseLayer),
    ActivationLayer(ActivationLayer),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    weights: Array2<f64>,
    bias: Array2<f64>,
}

impl DenseLayer {
    /// Weights and bias uniform in ±1/sqrt(input_size).
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (input_size.max(1) as f64).sqrt();
        let distribution = Uniform::new_inclusive(-bound, bound);
        let weights = Array2::random_using((input_size, output_size), distribution, rng);
        let bias = Array2::random_using((1, output_size), distribution, rng);
        Self { weights, bias }
    }

    pub fn from_parts(weights: Array2<f64>, bias: Array2<f64>) -> Self {
        assert_eq!(bias.nrows(), 1, "bias must be a single row");
        assert_eq!(weights.ncols(), bias.ncols(), "bias width must match weights");
        Self { weights, bias }
    }

    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn bias(&self) -> &Array2<f64> {
        &self.bias
    }
}

impl Layer for DenseLayer {
    fn forward_propagation(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }

    fn backward_propagation(
        &mut self,
        input: &Array2<f64>,
        output_error: Array2<f64>,
        optimizer: &mut EnumOptimizer,
        slot: usize,
    ) -> Array2<f64> {
        let input_error = output_error.dot(&self.weights.t());
        let weights_error = input.t().dot(&output_error);
        let bias_error = output_error.sum_axis(Axis(0)).insert_axis(Axis(0));
        optimizer.update(slot, &mut self.weights, &weights_error);
        optimizer.update(slot + 1, &mut self.bias, &bias_error);
        input_error
    }

    fn parameter_slots(&self) -> usize {
        2
    }

    fn input_size(&self) -> Option<usize> {
        Some(self.weights.nrows())
    }

    fn output_size(&self) -> Option<usize> {
        Some(self.weights.ncols())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationLayer {
    activation: Activation,
}

impl ActivationLayer {
    pub fn new(activation: Activation) -> Self {
        Self { activation }
    }
}

impl Layer for ActivationLayer {
    fn forward_propagation(&self, input: &Array2<f64>) -> Array2<f64> {
        self.activation.apply(input)
    }

    fn backward_propagation(
        &mut self,
        input: &Array2<f64>,
        output_error: Array2<f64>,
        _optimizer: &mut EnumOptimizer,
        _slot: usize,
    ) -> Array2<f64> {
        self.activation.derivative(input) * output_error
    }

    fn parameter_slots(&self) -> usize {
        0
    }

    fn input_size(&self) -> Option<usize> {
        None
    }

    fn output_size(&self) -> Option<usize> {
        None
    }
}
