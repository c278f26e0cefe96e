//! Feature-map preparation for the grid scan.
//!
//! A `[batch, H, W, C]` map is zero-padded at the bottom/right until `H` and
//! `W` are multiples of the window, then cut into an `h × w` grid of
//! `ph × pw` patches. Each patch is flattened row-major over
//! `(patch_row, patch_col, channel)` into `ph * pw * C` features.

use ndarray::{s, Array2, Array4, Axis};

use crate::error::{GlimpseError, Result};

/// Patch size `(height, width)` in input pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowShape {
    pub height: usize,
    pub width: usize,
}

impl WindowShape {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    pub fn validate(&self) -> Result<()> {
        if self.height == 0 || self.width == 0 {
            return Err(GlimpseError::config(format!(
                "window shape must be positive, got {}x{}",
                self.height, self.width
            )));
        }
        Ok(())
    }

    /// Grid dimensions `(h, w)` for an `height × width` input after padding.
    pub fn grid_dims(&self, height: usize, width: usize) -> (usize, usize) {
        (
            (height + pad_amount(height, self.height)) / self.height,
            (width + pad_amount(width, self.width)) / self.width,
        )
    }

    pub fn features(&self, channels: usize) -> usize {
        self.height * self.width * channels
    }
}

/// Which axes of the `[batch, h, w, features]` patch grid to scan backwards.
///
/// Only the two spatial axes may be reversed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AxisReversal {
    pub rows: bool,
    pub cols: bool,
}

impl AxisReversal {
    /// Build from a `[batch, rows, cols, channels]` flag set.
    pub fn from_flags(flags: [bool; 4]) -> Result<Self> {
        if flags[0] || flags[3] {
            return Err(GlimpseError::shape(format!(
                "axis reversal {flags:?} touches the batch or channel axis"
            )));
        }
        Ok(Self {
            rows: flags[1],
            cols: flags[2],
        })
    }

    pub fn is_identity(&self) -> bool {
        !self.rows && !self.cols
    }

    /// Reverse the selected spatial axes in place. Applying it twice is the
    /// identity.
    pub fn apply(&self, grid: &mut Array4<f32>) {
        if self.rows {
            grid.invert_axis(Axis(1));
        }
        if self.cols {
            grid.invert_axis(Axis(2));
        }
    }
}

/// Zero rows/columns needed to make `dim` a multiple of `win`.
pub fn pad_amount(dim: usize, win: usize) -> usize {
    (win - dim % win) % win
}

/// Append zero rows and columns so both spatial dims divide the window.
pub fn pad_to_window(input: &Array4<f32>, window: WindowShape) -> Array4<f32> {
    let (batch, height, width, channels) = input.dim();
    let pad_h = pad_amount(height, window.height);
    let pad_w = pad_amount(width, window.width);
    if pad_h == 0 && pad_w == 0 {
        return input.to_owned();
    }
    let mut padded = Array4::zeros((batch, height + pad_h, width + pad_w, channels));
    padded
        .slice_mut(s![.., ..height, ..width, ..])
        .assign(input);
    padded
}

/// Cut an already padded map into `[batch, h, w, ph * pw * C]` patches.
pub fn patchify(padded: &Array4<f32>, window: WindowShape) -> Array4<f32> {
    let (batch, height, width, channels) = padded.dim();
    let (ph, pw) = (window.height, window.width);
    let row_len = pw * channels;
    Array4::from_shape_fn(
        (batch, height / ph, width / pw, window.features(channels)),
        |(b, r, c, f)| {
            let (pr, rem) = (f / row_len, f % row_len);
            let (pc, ch) = (rem / channels, rem % channels);
            padded[[b, r * ph + pr, c * pw + pc, ch]]
        },
    )
}

/// Split a patch grid into one `[batch, features]` input per row-major
/// position.
pub fn positions(grid: &Array4<f32>) -> Vec<Array2<f32>> {
    let (_, h, w, _) = grid.dim();
    let mut out = Vec::with_capacity(h * w);
    for r in 0..h {
        for c in 0..w {
            out.push(grid.slice(s![.., r, c, ..]).to_owned());
        }
    }
    out
}

/// Inverse of [`positions`]: gather `h * w` `[batch, units]` outputs into
/// `[batch, h, w, units]`. An empty grid still keeps `batch` and `units`.
pub fn assemble(
    outputs: &[Array2<f32>],
    batch: usize,
    (h, w): (usize, usize),
    units: usize,
) -> Result<Array4<f32>> {
    if outputs.len() != h * w {
        return Err(GlimpseError::shape(format!(
            "{} outputs for a {h}x{w} grid",
            outputs.len()
        )));
    }
    let mut grid = Array4::zeros((batch, h, w, units));
    for (pos, out) in outputs.iter().enumerate() {
        if out.dim() != (batch, units) {
            return Err(GlimpseError::shape(format!(
                "output {pos} is {:?}, expected [{batch}, {units}]",
                out.shape()
            )));
        }
        grid.slice_mut(s![.., pos / w, pos % w, ..]).assign(out);
    }
    Ok(grid)
}
