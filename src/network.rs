// Based on https://towardsdatascience.com/math-neural-network-from-scratch-in-python-d6da9f29ce65
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use self::activation::Activation;
use self::layers::{ActivationLayer, DenseLayer, EnumLayer, Layer};
use self::loss::{mse, mse_prime};
use self::optimizer::{EnumOptimizer, Optimizer};

pub mod activation;
pub mod layers;
pub mod loss;
pub mod optimizer;

/// Feed-forward network trained on mean squared error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Network {
    layers: Vec<EnumLayer>,
}

impl Network {
    pub fn new() -> Self {
        Self { layers: vec![] }
    }

    /// Dense layers of the given hidden widths, each followed by `activation`, and a
    /// linear output layer.
    pub fn mlp<R: Rng + ?Sized>(
        input_size: usize,
        hidden_layers: &[usize],
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let mut network = Self::new();
        let mut width = input_size;
        for &hidden in hidden_layers {
            network.add(DenseLayer::new(width, hidden, rng));
            network.add(ActivationLayer::new(activation));
            width = hidden;
        }
        network.add(DenseLayer::new(width, output_size, rng));
        network
    }

    // add layer to network
    pub fn add(&mut self, layer: impl Into<EnumLayer>) {
        self.layers.push(layer.into())
    }

    pub fn layers(&self) -> &[EnumLayer] {
        &self.layers
    }

    pub fn input_size(&self) -> Option<usize> {
        self.layers.iter().find_map(|l| l.input_size())
    }

    pub fn output_size(&self) -> Option<usize> {
        self.layers.iter().rev().find_map(|l| l.output_size())
    }

    // predict output for given input
    pub fn predict(&self, input: &Array2<f64>) -> Array2<f64> {
        let mut output = input.clone();
        for layer in &self.layers {
            output = layer.forward_propagation(&output);
        }
        output
    }

    /// One gradient step towards `y_train`; returns the loss before the step.
    pub fn fit(
        &mut self,
        x_train: &Array2<f64>,
        y_train: &Array2<f64>,
        optimizer: &mut EnumOptimizer,
    ) -> f64 {
        // forward propagation, keeping every layer input for the backward pass
        let mut inputs: Vec<Array2<f64>> = Vec::with_capacity(self.layers.len());
        let mut output = x_train.clone();
        for layer in &self.layers {
            let next = layer.forward_propagation(&output);
            inputs.push(output);
            output = next;
        }

        // backward propagation
        optimizer.begin_step();
        let mut slot: usize = self.layers.iter().map(|l| l.parameter_slots()).sum();
        let mut error = mse_prime(y_train, &output);
        for (layer, input) in self.layers.iter_mut().zip(&inputs).rev() {
            slot -= layer.parameter_slots();
            error = layer.backward_propagation(input, error, optimizer, slot);
        }

        mse(y_train, &output)
    }

    pub fn copy_weights_and_bias(&mut self, other: &Network) {
        self.layers.clone_from(&other.layers);
    }
}
