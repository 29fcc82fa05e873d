use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

// https://www.v7labs.com/blog/neural-networks-activation-functions

pub fn linear(x: &Array2<f64>) -> Array2<f64> {
    x.clone()
}

pub fn linear_prime(x: &Array2<f64>) -> Array2<f64> {
    Array2::ones(x.raw_dim())
}

pub fn tanh(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| v.tanh())
}

pub fn tanh_prime(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| 1.0 - v.tanh().powi(2))
}

pub fn relu(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| v.max(0.0))
}

pub fn relu_prime(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| if *v > 0.0 { 1.0 } else { 0.0 })
}

pub fn leaky_relu(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| if *v > 0.0 { *v } else { 0.01 * v })
}

pub fn leaky_relu_prime(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| if *v > 0.0 { 1.0 } else { 0.01 })
}

pub fn sigmoid(x: &Array2<f64>) -> Array2<f64> {
    x.map(|v| 1.0 / (1.0 + (-v).exp()))
}

pub fn sigmoid_prime(x: &Array2<f64>) -> Array2<f64> {
    let s = sigmoid(x);
    &s * &(1.0 - &s)
}

/// Element-wise non-linearity of an activation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Linear,
    Relu,
    LeakyRelu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Linear => linear(x),
            Self::Relu => relu(x),
            Self::LeakyRelu => leaky_relu(x),
            Self::Tanh => tanh(x),
            Self::Sigmoid => sigmoid(x),
        }
    }

    pub fn derivative(&self, x: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Linear => linear_prime(x),
            Self::Relu => relu_prime(x),
            Self::LeakyRelu => leaky_relu_prime(x),
            Self::Tanh => tanh_prime(x),
            Self::Sigmoid => sigmoid_prime(x),
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "leaky_relu" | "leaky-relu" => Ok(Self::LeakyRelu),
            "tanh" => Ok(Self::Tanh),
            "sigmoid" => Ok(Self::Sigmoid),
            other => Err(format!("unknown activation {other:?}")),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Linear => "linear",
            Self::Relu => "relu",
            Self::LeakyRelu => "leaky_relu",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn relu_clamps_negatives() {
        let x = arr2(&[[-1.0, 0.0, 2.5]]);
        assert_eq!(relu(&x), arr2(&[[0.0, 0.0, 2.5]]));
        assert_eq!(relu_prime(&x), arr2(&[[0.0, 0.0, 1.0]]));
    }

    #[test]
    fn sigmoid_prime_peaks_at_zero() {
        let x = arr2(&[[0.0]]);
        assert!((sigmoid_prime(&x)[[0, 0]] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for activation in [
            Activation::Linear,
            Activation::Relu,
            Activation::LeakyRelu,
            Activation::Tanh,
            Activation::Sigmoid,
        ] {
            assert_eq!(activation.to_string().parse(), Ok(activation));
        }
    }
}
