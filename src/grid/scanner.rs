//! Grid scan drivers.
//!
//! Positions of the `h × w` patch grid are visited in row-major order,
//! `pos = r * w + c`. Position `pos` reads the state written at `pos - w`
//! (up) and `pos - 1` (left); neighbours outside the grid read the single
//! shared zero sentinel slot of the [`StateArena`].
//!
//! The recurrence is expressed once, in [`grid_step`]. Two drivers call it:
//!
//! - [`ScanStrategy::Dynamic`]: one loop over a runtime position counter,
//!   `while pos < h * w`, resolving neighbour slots as it goes.
//! - [`ScanStrategy::Unrolled`]: an [`UnrolledPlan`] of `h * w` steps with
//!   neighbour slots fixed before any computation runs, then executed in order.
//!
//! Both share one parameter scope, so the cell weights are created by the
//! first position and reused by every other one, and both produce identical
//! outputs.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array4};

use crate::config::GRID_SCOPE_PREFIX;
use crate::error::{GlimpseError, Result};
use crate::grid::patches::{self, AxisReversal, WindowShape};
use crate::nn::grid_cell::{CellState, GridLstmCell};
use crate::params::{ParamStore, Scope};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Runtime-length loop; no per-position setup cost.
    #[default]
    Dynamic,
    /// Plan unrolled over every position up front.
    Unrolled,
}

impl fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStrategy::Dynamic => write!(f, "dynamic"),
            ScanStrategy::Unrolled => write!(f, "unrolled"),
        }
    }
}

impl FromStr for ScanStrategy {
    type Err = GlimpseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dynamic" | "while_loop" => Ok(ScanStrategy::Dynamic),
            "unrolled" | "static" => Ok(ScanStrategy::Unrolled),
            other => Err(GlimpseError::config(format!("unknown scan strategy '{other}'"))),
        }
    }
}

/// Address of a state in the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Position(usize),
    Sentinel,
}

/// `(up, left)` neighbour slots of `pos` in a grid of width `width`.
pub fn neighbor_slots(pos: usize, width: usize) -> (Slot, Slot) {
    let up = if pos >= width {
        Slot::Position(pos - width)
    } else {
        Slot::Sentinel
    };
    let left = if pos % width != 0 {
        Slot::Position(pos - 1)
    } else {
        Slot::Sentinel
    };
    (up, left)
}

/// One state slot per grid position plus the shared zero sentinel.
pub struct StateArena {
    slots: Vec<Option<CellState>>,
    sentinel: CellState,
}

impl StateArena {
    pub fn new(positions: usize, batch: usize, num_units: usize) -> Self {
        Self {
            slots: vec![None; positions],
            sentinel: CellState::zeros(batch, num_units),
        }
    }

    pub fn read(&self, slot: Slot) -> Result<&CellState> {
        match slot {
            Slot::Sentinel => Ok(&self.sentinel),
            Slot::Position(p) => self.slots.get(p).and_then(Option::as_ref).ok_or_else(|| {
                GlimpseError::shape(format!("state at position {p} read before it was written"))
            }),
        }
    }

    pub fn write(&mut self, pos: usize, state: CellState) -> Result<()> {
        let slot = self.slots.get_mut(pos).ok_or_else(|| {
            GlimpseError::shape(format!("position {pos} outside the state arena"))
        })?;
        *slot = Some(state);
        Ok(())
    }

    /// States in position order; fails if any position was never visited.
    pub fn into_states(self) -> Result<Vec<CellState>> {
        self.slots
            .into_iter()
            .enumerate()
            .map(|(p, s)| {
                s.ok_or_else(|| GlimpseError::shape(format!("position {p} was never visited")))
            })
            .collect()
    }
}

/// One precomputed step of the unrolled driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannedStep {
    pub pos: usize,
    pub up: Slot,
    pub left: Slot,
}

/// The grid recurrence unrolled over every position of a known grid.
#[derive(Clone, Debug)]
pub struct UnrolledPlan {
    steps: Vec<PlannedStep>,
}

impl UnrolledPlan {
    pub fn build(height: usize, width: usize) -> Self {
        let steps = (0..height * width)
            .map(|pos| {
                let (up, left) = neighbor_slots(pos, width);
                PlannedStep { pos, up, left }
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of a grid scan.
#[derive(Clone, Debug)]
pub struct GridScanOutput {
    /// `[batch, h, w, hidden_size]`, in input orientation.
    pub output: Array4<f32>,
    /// State written at each row-major position of the (possibly reversed)
    /// scan order.
    pub states: Vec<CellState>,
    /// Grid dimensions `(h, w)`.
    pub grid: (usize, usize),
}

/// The step function shared by both drivers.
fn grid_step(
    cell: &GridLstmCell,
    inputs: &[Array2<f32>],
    arena: &StateArena,
    step: PlannedStep,
    params: &mut ParamStore,
    scope: &Scope,
) -> Result<(Array2<f32>, CellState)> {
    let input = inputs
        .get(step.pos)
        .ok_or_else(|| GlimpseError::shape(format!("no input for position {}", step.pos)))?;
    cell.step(input, arena.read(step.up)?, arena.read(step.left)?, params, scope)
}

/// Grid LSTM scanner over `[batch, H, W, C]` feature maps.
#[derive(Clone, Debug)]
pub struct GridScanner {
    cell: GridLstmCell,
    window: WindowShape,
    reverse: AxisReversal,
    strategy: ScanStrategy,
    scope: Scope,
}

impl GridScanner {
    /// Scanner whose parameters live under `MultiDimensionalLSTMCell-<scope_name>`.
    pub fn new(hidden_size: usize, window: WindowShape, scope_name: &str) -> Result<Self> {
        window.validate()?;
        if hidden_size == 0 {
            return Err(GlimpseError::config("hidden size must be positive"));
        }
        Ok(Self {
            cell: GridLstmCell::new(hidden_size),
            window,
            reverse: AxisReversal::default(),
            strategy: ScanStrategy::default(),
            scope: Scope::new(&format!("{GRID_SCOPE_PREFIX}{scope_name}")),
        })
    }

    pub fn with_cell(mut self, cell: GridLstmCell) -> Self {
        self.cell = cell;
        self
    }

    pub fn with_reverse(mut self, reverse: AxisReversal) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_strategy(mut self, strategy: ScanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn scan(&self, input: &Array4<f32>, params: &mut ParamStore) -> Result<GridScanOutput> {
        let padded = patches::pad_to_window(input, self.window);
        let mut grid = patches::patchify(&padded, self.window);
        self.reverse.apply(&mut grid);
        let (batch, h, w, features) = grid.dim();
        tracing::debug!(
            batch,
            rows = h,
            cols = w,
            features,
            hidden = self.cell.num_units(),
            strategy = %self.strategy,
            reversed = !self.reverse.is_identity(),
            "grid scan"
        );

        let inputs = patches::positions(&grid);
        let mut arena = StateArena::new(h * w, batch, self.cell.num_units());
        let outputs = match self.strategy {
            ScanStrategy::Dynamic => self.run_dynamic(&inputs, w, &mut arena, params)?,
            ScanStrategy::Unrolled => {
                let plan = UnrolledPlan::build(h, w);
                self.run_unrolled(&plan, &inputs, &mut arena, params)?
            }
        };

        let mut output = patches::assemble(&outputs, batch, (h, w), self.cell.num_units())?;
        self.reverse.apply(&mut output);
        let output = output.as_standard_layout().into_owned();
        tracing::debug!(positions = outputs.len(), params = params.len(), "grid scan finished");
        Ok(GridScanOutput {
            output,
            states: arena.into_states()?,
            grid: (h, w),
        })
    }

    fn run_dynamic(
        &self,
        inputs: &[Array2<f32>],
        width: usize,
        arena: &mut StateArena,
        params: &mut ParamStore,
    ) -> Result<Vec<Array2<f32>>> {
        let total = inputs.len();
        let mut outputs = Vec::with_capacity(total);
        let mut pos = 0;
        while pos < total {
            let (up, left) = neighbor_slots(pos, width);
            let step = PlannedStep { pos, up, left };
            let (out, state) = grid_step(&self.cell, inputs, arena, step, params, &self.scope)?;
            arena.write(pos, state)?;
            outputs.push(out);
            pos += 1;
        }
        Ok(outputs)
    }

    fn run_unrolled(
        &self,
        plan: &UnrolledPlan,
        inputs: &[Array2<f32>],
        arena: &mut StateArena,
        params: &mut ParamStore,
    ) -> Result<Vec<Array2<f32>>> {
        let mut outputs = Vec::with_capacity(plan.len());
        for &step in plan.steps() {
            let (out, state) = grid_step(&self.cell, inputs, arena, step, params, &self.scope)?;
            arena.write(step.pos, state)?;
            outputs.push(out);
        }
        Ok(outputs)
    }
}

/// Scan `input` (`[batch, H, W, C]`) with a grid LSTM of `hidden_size` units.
///
/// `reverse` is an optional `[batch, rows, cols, channels]` flag set; the
/// batch and channel flags must be `false`. Returns the
/// `[batch, ceil(H/ph), ceil(W/pw), hidden_size]` map and the state
/// trajectory.
pub fn scan_grid(
    hidden_size: usize,
    input: &Array4<f32>,
    window: WindowShape,
    reverse: Option<[bool; 4]>,
    strategy: ScanStrategy,
    params: &mut ParamStore,
    scope_name: &str,
) -> Result<GridScanOutput> {
    let reverse = match reverse {
        Some(flags) => AxisReversal::from_flags(flags)?,
        None => AxisReversal::default(),
    };
    GridScanner::new(hidden_size, window, scope_name)?
        .with_reverse(reverse)
        .with_strategy(strategy)
        .scan(input, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{s, Axis};

    fn feature_map(b: usize, h: usize, w: usize, c: usize) -> Array4<f32> {
        Array4::from_shape_fn((b, h, w, c), |(bi, y, x, ch)| {
            (((bi * 31 + y * 17 + x * 7 + ch * 3) % 23) as f32 / 23.0) - 0.5
        })
    }

    #[test]
    fn test_neighbor_slots() {
        assert_eq!(neighbor_slots(0, 3), (Slot::Sentinel, Slot::Sentinel));
        assert_eq!(neighbor_slots(2, 3), (Slot::Sentinel, Slot::Position(1)));
        assert_eq!(neighbor_slots(3, 3), (Slot::Position(0), Slot::Sentinel));
        assert_eq!(neighbor_slots(4, 3), (Slot::Position(1), Slot::Position(3)));
    }

    #[test]
    fn test_unrolled_plan_matches_runtime_resolution() {
        let plan = UnrolledPlan::build(3, 4);
        assert_eq!(plan.len(), 12);
        for step in plan.steps() {
            assert_eq!((step.up, step.left), neighbor_slots(step.pos, 4));
        }
    }

    #[test]
    fn test_arena_rejects_unwritten_read() {
        let arena = StateArena::new(4, 1, 2);
        assert!(arena.read(Slot::Sentinel).is_ok());
        assert!(arena.read(Slot::Position(1)).is_err());
    }

    #[test]
    fn test_strategies_identical() {
        let x = feature_map(2, 5, 7, 3);
        let window = WindowShape::new(2, 3);

        let mut p1 = ParamStore::new(42);
        let dynamic = scan_grid(4, &x, window, None, ScanStrategy::Dynamic, &mut p1, "layer1").unwrap();
        let mut p2 = ParamStore::new(42);
        let unrolled = scan_grid(4, &x, window, None, ScanStrategy::Unrolled, &mut p2, "layer1").unwrap();

        assert_eq!(dynamic.output.dim(), (2, 3, 3, 4));
        assert_eq!(dynamic.output, unrolled.output);
        assert_eq!(dynamic.states, unrolled.states);
        assert_eq!(p1.len(), p2.len());
    }

    #[test]
    fn test_single_parameter_set_for_all_positions() {
        let mut params = ParamStore::new(1);
        let x = feature_map(1, 4, 4, 1);
        scan_grid(3, &x, WindowShape::new(1, 1), None, ScanStrategy::Unrolled, &mut params, "l").unwrap();
        // one kernel + 6 layer norms × (scale, shift), regardless of 16 positions
        assert_eq!(params.len(), 13);
        assert!(params.contains("MultiDimensionalLSTMCell-l/kernel"));
    }

    #[test]
    fn test_aligned_input_needs_no_padding() {
        let x = feature_map(1, 4, 6, 2);
        let window = WindowShape::new(2, 3);
        let mut params = ParamStore::new(9);
        let direct = scan_grid(3, &x, window, None, ScanStrategy::Dynamic, &mut params, "a").unwrap();
        let padded = patches::pad_to_window(&x, window);
        assert_eq!(padded, x);
        let again = scan_grid(3, &padded, window, None, ScanStrategy::Dynamic, &mut params, "a").unwrap();
        assert_eq!(direct.output, again.output);
    }

    #[test]
    fn test_single_patch_equals_one_cell_step() {
        let x = feature_map(2, 2, 2, 3);
        let window = WindowShape::new(2, 2);
        let mut params = ParamStore::new(3);
        let scanned = scan_grid(5, &x, window, None, ScanStrategy::Dynamic, &mut params, "one").unwrap();
        assert_eq!(scanned.grid, (1, 1));

        let patch = patches::patchify(&x, window).slice(s![.., 0, 0, ..]).to_owned();
        let zero = CellState::zeros(2, 5);
        let (h, state) = GridLstmCell::new(5)
            .step(&patch, &zero, &zero, &mut params, &Scope::new("MultiDimensionalLSTMCell-one"))
            .unwrap();
        assert_eq!(scanned.output.slice(s![.., 0, 0, ..]), h);
        assert_eq!(scanned.states[0], state);
    }

    #[test]
    fn test_reversed_columns_match_flipped_scan() {
        let x = feature_map(1, 3, 4, 2);
        let window = WindowShape::new(1, 1);

        let mut params = ParamStore::new(8);
        let reversed = scan_grid(
            3,
            &x,
            window,
            Some([false, false, true, false]),
            ScanStrategy::Dynamic,
            &mut params,
            "r",
        )
        .unwrap();

        let mut flipped = x.clone();
        flipped.invert_axis(Axis(2));
        let mut expected = scan_grid(3, &flipped, window, None, ScanStrategy::Dynamic, &mut params, "r")
            .unwrap()
            .output;
        expected.invert_axis(Axis(2));
        assert_eq!(reversed.output, expected);
    }

    #[test]
    fn test_first_cell_of_reversed_scan_is_bottom_right() {
        let x = feature_map(1, 3, 3, 1);
        let mut params = ParamStore::new(8);
        let out = scan_grid(
            2,
            &x,
            WindowShape::new(1, 1),
            Some([false, true, true, false]),
            ScanStrategy::Unrolled,
            &mut params,
            "rr",
        )
        .unwrap();
        // state 0 of the scan order is the output at the bottom-right pixel
        assert_eq!(out.output.slice(s![.., 2, 2, ..]), out.states[0].h);
    }

    #[test]
    fn test_invalid_reversal_and_window() {
        let x = feature_map(1, 2, 2, 1);
        let mut params = ParamStore::new(8);
        let batch_flip = Some([true, false, false, false]);
        let err = scan_grid(2, &x, WindowShape::new(1, 1), batch_flip, ScanStrategy::Dynamic, &mut params, "x")
            .unwrap_err();
        assert!(matches!(err, GlimpseError::Shape(_)));
        let err = scan_grid(2, &x, WindowShape::new(0, 1), None, ScanStrategy::Dynamic, &mut params, "x")
            .unwrap_err();
        assert!(matches!(err, GlimpseError::Configuration(_)));
    }

    #[test]
    fn test_zero_height_map_keeps_batch_and_hidden() {
        let x = Array4::<f32>::zeros((2, 0, 4, 3));
        for strategy in [ScanStrategy::Dynamic, ScanStrategy::Unrolled] {
            let mut params = ParamStore::new(8);
            let out = scan_grid(5, &x, WindowShape::new(1, 2), None, strategy, &mut params, "empty").unwrap();
            assert_eq!(out.output.dim(), (2, 0, 2, 5));
            assert_eq!(out.grid, (0, 2));
            assert!(out.states.is_empty());
            assert!(params.is_empty());
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("static".parse::<ScanStrategy>().unwrap(), ScanStrategy::Unrolled);
        assert_eq!("while_loop".parse::<ScanStrategy>().unwrap(), ScanStrategy::Dynamic);
        assert!("parallel".parse::<ScanStrategy>().is_err());
    }
}
