//! Neural building blocks: layer norm, the grid LSTM cell and the simple
//! recurrent cell used by the reader.

pub mod activation;
pub mod grid_cell;
pub mod layer_norm;
pub mod rnn_cell;

pub use activation::Activation;
pub use grid_cell::{CellState, GridLstmCell};
pub use layer_norm::{layer_norm, layer_norm_dyn};
pub use rnn_cell::BasicRnnCell;
