//! 2-D grid scanning with the grid LSTM cell.
//!
//! - `patches`: padding, patch extraction and axis reversal of feature maps
//! - `scanner`: the state arena, the shared step function and both drivers

pub mod patches;
pub mod scanner;

pub use patches::{AxisReversal, WindowShape};
pub use scanner::{scan_grid, GridScanOutput, GridScanner, ScanStrategy, Slot, UnrolledPlan};
