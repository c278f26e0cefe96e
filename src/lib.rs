//! # glimpse
//!
//! Two forward components for neural text/image models, built on `ndarray`:
//!
//! 1. **Grid scan**: a multi-dimensional LSTM cell with layer-normalized
//!    gates, driven over a 2-D grid of patches in row-major wavefront order.
//!    Each cell reads the state of its upper and left neighbours, or a shared
//!    zero sentinel at the border. Two drivers (a runtime loop and an unrolled
//!    plan) produce identical outputs.
//! 2. **Selective reader**: builds a document×query match matrix and walks
//!    it with glimpse → jump → represent steps, stopping each batch example
//!    independently, and aggregates a relevance score with a trace of the
//!    visited regions.
//!
//! Learned parameters live in a [`params::ParamStore`] with
//! create-on-first-use semantics; gradients and training are left to the
//! enclosing framework.

pub mod error;
pub mod grid;
pub mod nn;
pub mod params;
pub mod reader;

pub use error::{GlimpseError, Result};
pub use grid::scanner::{scan_grid, GridScanOutput, ScanStrategy};
pub use reader::selective::{match_and_read, ReadDiagnostics};

/// Crate-wide defaults.
pub mod config {
    /// Epsilon added to the variance before the square root in layer norm.
    pub const LAYER_NORM_EPSILON: f32 = 1e-5;

    /// Constant added to both forget gates of the grid cell before the sigmoid.
    pub const DEFAULT_FORGET_BIAS: f32 = 0.0;

    /// Default seed for parameter initialization.
    pub const DEFAULT_SEED: u64 = 0x5EED_0F_6217;

    /// Prefix of the variable scope created by each grid scan.
    pub const GRID_SCOPE_PREFIX: &str = "MultiDimensionalLSTMCell-";

    /// Variable scope of the selective reader.
    pub const READER_SCOPE: &str = "SelectiveJump";

    /// Default number of reader steps.
    pub const DEFAULT_MAX_JUMP_STEP: usize = 10;
}
