//! Basic recurrent cell: `h' = act([x, h] · W + b)`.
//!
//! Used by the reader's `rnn_hard` representation, where one shared cell
//! encodes both the document slice and the query slice.

use ndarray::{concatenate, Array2, Array3, Axis};

use crate::error::{GlimpseError, Result};
use crate::nn::activation::Activation;
use crate::params::{Initializer, ParamStore, Scope};

#[derive(Clone, Debug)]
pub struct BasicRnnCell {
    num_units: usize,
    activation: Activation,
}

impl BasicRnnCell {
    pub fn new(num_units: usize) -> Self {
        Self {
            num_units,
            activation: Activation::Tanh,
        }
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    pub fn zero_state(&self, batch: usize) -> Array2<f32> {
        Array2::zeros((batch, self.num_units))
    }

    /// One step over `[batch, in]` inputs.
    pub fn step(
        &self,
        input: &Array2<f32>,
        state: &Array2<f32>,
        params: &mut ParamStore,
        scope: &Scope,
    ) -> Result<Array2<f32>> {
        let scope = scope.child("basic_rnn_cell");
        let u = self.num_units;
        let xh = concatenate(Axis(1), &[input.view(), state.view()])
            .map_err(|e| GlimpseError::shape(format!("concat rnn inputs: {e}")))?;
        let pre = {
            let kernel = params.matrix_view(&scope.var("kernel"), xh.ncols(), u, Initializer::GlorotUniform)?;
            xh.dot(&kernel)
        };
        let bias = params.vector(&scope.var("bias"), u, Initializer::Zeros)?;
        Ok(self.activation.apply(&(pre + &bias)))
    }

    /// Run the cell over `[batch, time, in]` inputs from a zero state and
    /// return the final state of each example.
    ///
    /// Example `b` only advances for `t < lengths[b]`; past its length its
    /// state is carried unchanged, so a zero length yields the zero state.
    pub fn run_sequences(
        &self,
        inputs: &Array3<f32>,
        lengths: &[usize],
        params: &mut ParamStore,
        scope: &Scope,
    ) -> Result<Array2<f32>> {
        let (batch, time, _) = inputs.dim();
        if lengths.len() != batch {
            return Err(GlimpseError::shape(format!(
                "{} sequence lengths for a batch of {batch}",
                lengths.len()
            )));
        }
        let mut state = self.zero_state(batch);
        for t in 0..time {
            let x_t = inputs.index_axis(Axis(1), t).to_owned();
            let next = self.step(&x_t, &state, params, scope)?;
            for (b, &len) in lengths.iter().enumerate() {
                if t < len {
                    state.row_mut(b).assign(&next.row(b));
                }
            }
        }
        Ok(state)
    }
}
