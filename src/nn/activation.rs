//! Element-wise activations.

use ndarray::{Array, Dimension};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Activation {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

impl Activation {
    pub fn apply<D: Dimension>(&self, x: &Array<f32, D>) -> Array<f32, D> {
        match self {
            Activation::Tanh => x.mapv(f32::tanh),
            Activation::Sigmoid => sigmoid(x),
            Activation::Relu => x.mapv(|v| v.max(0.0)),
            Activation::Identity => x.clone(),
        }
    }
}

/// Logistic function, element-wise over any dimensionality.
pub fn sigmoid<D: Dimension>(x: &Array<f32, D>) -> Array<f32, D> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}
