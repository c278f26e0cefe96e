//! Grid LSTM cell: one step of the two-predecessor recurrence.
//!
//! The cell merges an upper and a left neighbour, so it carries two memories
//! and two hidden outputs on input:
//!
//! ```text
//! [i, j, f_up, f_left, o] = [x, h_up, h_left] · W              (no bias)
//! each gate g  ← LN_g(g)                                        (own scale/shift)
//! i, o         ← σ(i), σ(o)
//! f_up, f_left ← σ(f_up + b_f), σ(f_left + b_f)
//! c'           = c_up ⊙ f_up + c_left ⊙ f_left + i ⊙ act(j)
//! h'           = act(LN_new_h(c')) ⊙ o
//! ```
//!
//! Layer norm supplies the shift, which is why the projection has no bias.

use ndarray::{concatenate, s, Array2, Axis};

use crate::config::DEFAULT_FORGET_BIAS;
use crate::error::{GlimpseError, Result};
use crate::nn::activation::{sigmoid, Activation};
use crate::nn::layer_norm::layer_norm;
use crate::params::{Initializer, ParamStore, Scope};

/// Gate scopes, in the order the projection is split.
const GATES: [&str; 5] = ["i", "j", "f1", "f2", "o"];

/// Memory and hidden output of one grid position: `[batch, num_units]` each.
#[derive(Clone, Debug, PartialEq)]
pub struct CellState {
    pub c: Array2<f32>,
    pub h: Array2<f32>,
}

impl CellState {
    /// The zero state used for out-of-grid neighbours.
    pub fn zeros(batch: usize, num_units: usize) -> Self {
        Self {
            c: Array2::zeros((batch, num_units)),
            h: Array2::zeros((batch, num_units)),
        }
    }

    /// Check the state has not diverged (NaN or Inf).
    pub fn is_healthy(&self) -> bool {
        self.c.iter().chain(self.h.iter()).all(|v| v.is_finite())
    }
}

#[derive(Clone, Debug)]
pub struct GridLstmCell {
    num_units: usize,
    forget_bias: f32,
    activation: Activation,
}

impl GridLstmCell {
    pub fn new(num_units: usize) -> Self {
        Self {
            num_units,
            forget_bias: DEFAULT_FORGET_BIAS,
            activation: Activation::Tanh,
        }
    }

    pub fn with_forget_bias(mut self, forget_bias: f32) -> Self {
        self.forget_bias = forget_bias;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn num_units(&self) -> usize {
        self.num_units
    }

    /// Apply the cell to `input` (`[batch, in]`) given the upper and left
    /// predecessor states. Returns `(h', CellState { c', h' })`.
    ///
    /// Parameters are created under `scope` on the first call and reused by
    /// every later call with the same scope.
    pub fn step(
        &self,
        input: &Array2<f32>,
        up: &CellState,
        left: &CellState,
        params: &mut ParamStore,
        scope: &Scope,
    ) -> Result<(Array2<f32>, CellState)> {
        let u = self.num_units;
        let batch = input.nrows();
        for (which, state) in [("up", up), ("left", left)] {
            if state.c.dim() != (batch, u) || state.h.dim() != (batch, u) {
                return Err(GlimpseError::shape(format!(
                    "{which} state is {:?}/{:?}, expected [{batch}, {u}]",
                    state.c.dim(),
                    state.h.dim()
                )));
            }
        }

        let x = concatenate(Axis(1), &[input.view(), up.h.view(), left.h.view()])
            .map_err(|e| GlimpseError::shape(format!("concat cell inputs: {e}")))?;
        let projected = {
            let kernel =
                params.matrix_view(&scope.var("kernel"), x.ncols(), 5 * u, Initializer::GlorotUniform)?;
            x.dot(&kernel)
        };

        let mut gates = Vec::with_capacity(GATES.len());
        for (k, name) in GATES.iter().enumerate() {
            let raw = projected.slice(s![.., k * u..(k + 1) * u]).to_owned();
            gates.push(layer_norm(&raw, params, &scope.child(name))?);
        }
        let o = sigmoid(&gates[4]);
        let f_left = sigmoid(&(&gates[3] + self.forget_bias));
        let f_up = sigmoid(&(&gates[2] + self.forget_bias));
        let j = self.activation.apply(&gates[1]);
        let i = sigmoid(&gates[0]);

        let new_c = &up.c * &f_up + &left.c * &f_left + &i * &j;
        let new_h = self
            .activation
            .apply(&layer_norm(&new_c, params, &scope.child("new_h"))?)
            * &o;

        Ok((
            new_h.clone(),
            CellState {
                c: new_c,
                h: new_h,
            },
        ))
    }
}
