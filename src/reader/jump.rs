//! Jump phase: commit to a sub-region of the glimpse.

use std::sync::Arc;

use ndarray::{s, Array2, Array3};

use crate::error::{GlimpseError, Result};
use crate::reader::config::JumpMode;
use crate::reader::location::{index_range, DOC_EXTENT, DOC_START, QUERY_EXTENT, QUERY_START};

/// External region selector for `min_density_hard`.
///
/// Given the match matrix `[b, doc_len, query_len]`, the valid lengths
/// `[b, 2]`, the glimpse locations `[b, 4]` and a density threshold, returns
/// one `[b, 4]` region per example satisfying the implementation's density
/// criterion. The result is treated as a constant: nothing downstream
/// differentiates through it.
pub trait DensityJumper: Send + Sync {
    fn jump(
        &self,
        match_matrix: &Array3<f32>,
        dq_size: &Array2<usize>,
        location: &Array2<f32>,
        min_density: f32,
    ) -> anyhow::Result<Array2<f32>>;
}

/// Jump selection for every example of the batch.
pub struct Jumper {
    mode: JumpMode,
    density: Option<Arc<dyn DensityJumper>>,
}

impl Jumper {
    pub fn new(mode: JumpMode, density: Option<Arc<dyn DensityJumper>>) -> Result<Self> {
        if matches!(mode, JumpMode::MinDensityHard { .. }) && density.is_none() {
            return Err(GlimpseError::config(
                "min_density_hard needs a density jumper implementation",
            ));
        }
        Ok(Self { mode, density })
    }

    pub fn jump(
        &self,
        match_matrix: &Array3<f32>,
        dq_size: &Array2<usize>,
        glimpse: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        match self.mode {
            JumpMode::MaxHard => Ok(max_hard(match_matrix, glimpse)),
            JumpMode::Test => Ok(test_step(glimpse)),
            JumpMode::MinDensityHard { min_density } => {
                let jumper = self.density.as_ref().ok_or_else(|| {
                    GlimpseError::config("min_density_hard needs a density jumper implementation")
                })?;
                let out = jumper
                    .jump(match_matrix, dq_size, glimpse, min_density)
                    .map_err(GlimpseError::Jumper)?;
                if out.dim() != (glimpse.nrows(), 4) {
                    return Err(GlimpseError::shape(format!(
                        "density jumper returned {:?}, expected [{}, 4]",
                        out.shape(),
                        glimpse.nrows()
                    )));
                }
                if let Some(((b, k), v)) = out
                    .indexed_iter()
                    .find(|(_, v)| !v.is_finite() || **v < 0.0)
                {
                    return Err(GlimpseError::shape(format!(
                        "density jumper returned {v} at [{b}, {k}]; locations must be finite and non-negative"
                    )));
                }
                Ok(out)
            }
        }
    }
}

/// Unit-height region at the glimpse row with the largest absolute match
/// against any query column. Ties go to the earliest row; a glimpse with no
/// rows inside the matrix commits at its own start.
pub fn max_hard(match_matrix: &Array3<f32>, glimpse: &Array2<f32>) -> Array2<f32> {
    let rows = match_matrix.dim().1;
    let mut out = Array2::zeros((glimpse.nrows(), 4));
    for (b, g) in glimpse.outer_iter().enumerate() {
        let (lo, hi) = index_range(g[DOC_START], g[DOC_EXTENT], rows);
        let mut best_row = g[DOC_START].floor();
        let mut best = f32::NEG_INFINITY;
        for row in lo..hi {
            let peak = match_matrix
                .slice(s![b, row, ..])
                .fold(f32::NEG_INFINITY, |acc, v| acc.max(v.abs()));
            if peak > best {
                best = peak;
                best_row = row as f32;
            }
        }
        out.row_mut(b)
            .assign(&ndarray::arr1(&[best_row, g[QUERY_START], 1.0, g[QUERY_EXTENT]]));
    }
    out
}

/// Deterministic stepping used to exercise the loop: advance the document
/// start by `min(1, query_start)` with a unit-height region.
pub fn test_step(glimpse: &Array2<f32>) -> Array2<f32> {
    let mut out = Array2::zeros((glimpse.nrows(), 4));
    for (b, g) in glimpse.outer_iter().enumerate() {
        let start = g[DOC_START] + g[QUERY_START].min(1.0);
        out.row_mut(b)
            .assign(&ndarray::arr1(&[start, g[QUERY_START], 1.0, g[QUERY_EXTENT]]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct WidenBy(f32);

    impl DensityJumper for WidenBy {
        fn jump(
            &self,
            _match_matrix: &Array3<f32>,
            _dq_size: &Array2<usize>,
            location: &Array2<f32>,
            _min_density: f32,
        ) -> anyhow::Result<Array2<f32>> {
            let mut out = location.clone();
            out.column_mut(DOC_EXTENT).mapv_inplace(|v| v + self.0);
            Ok(out)
        }
    }

    struct Broken;

    impl DensityJumper for Broken {
        fn jump(
            &self,
            _: &Array3<f32>,
            _: &Array2<usize>,
            _: &Array2<f32>,
            _: f32,
        ) -> anyhow::Result<Array2<f32>> {
            anyhow::bail!("kernel not loaded")
        }
    }

    #[test]
    fn test_max_hard_picks_largest_abs_row() {
        let m = array![[[0.1f32, 0.2], [-0.9, 0.0], [0.5, 0.5], [2.0, 2.0]]];
        let glimpse = array![[0.0f32, 0.0, 3.0, 2.0]];
        let j = max_hard(&m, &glimpse);
        // row 3 lies outside the glimpse
        assert_eq!(j, array![[1.0f32, 0.0, 1.0, 2.0]]);
    }

    #[test]
    fn test_max_hard_ties_and_offsets() {
        let m = Array3::<f32>::zeros((1, 4, 2));
        let glimpse = array![[2.0f32, 0.0, 2.0, 2.0]];
        assert_eq!(max_hard(&m, &glimpse).row(0)[DOC_START], 2.0);

        let outside = array![[7.0f32, 0.0, 1.0, 2.0]];
        assert_eq!(max_hard(&m, &outside).row(0)[DOC_START], 7.0);
    }

    #[test]
    fn test_step_mode() {
        let g = array![[2.0f32, 0.0, 3.0, 4.0], [2.0, 3.0, 3.0, 4.0]];
        assert_eq!(
            test_step(&g),
            array![[2.0f32, 0.0, 1.0, 4.0], [3.0, 3.0, 1.0, 4.0]]
        );
    }

    #[test]
    fn test_min_density_requires_jumper() {
        let mode = JumpMode::MinDensityHard { min_density: 0.3 };
        assert!(matches!(
            Jumper::new(mode, None),
            Err(GlimpseError::Configuration(_))
        ));
    }

    #[test]
    fn test_min_density_delegates() {
        let jumper = Jumper::new(
            JumpMode::MinDensityHard { min_density: 0.3 },
            Some(Arc::new(WidenBy(2.0))),
        )
        .unwrap();
        let m = Array3::<f32>::zeros((1, 4, 2));
        let dq = array![[4usize, 2]];
        let out = jumper.jump(&m, &dq, &array![[1.0f32, 0.0, 1.0, 2.0]]).unwrap();
        assert_eq!(out, array![[1.0f32, 0.0, 3.0, 2.0]]);
    }

    #[test]
    fn test_min_density_rejects_unbounded_regions() {
        let m = Array3::<f32>::zeros((1, 4, 2));
        let dq = array![[4usize, 2]];
        let glimpse = array![[0.0f32, 0.0, 1.0, 2.0]];
        for bad in [f32::INFINITY, f32::NAN, -5.0] {
            let jumper = Jumper::new(
                JumpMode::MinDensityHard { min_density: 0.3 },
                Some(Arc::new(WidenBy(bad))),
            )
            .unwrap();
            let err = jumper.jump(&m, &dq, &glimpse).unwrap_err();
            assert!(matches!(err, GlimpseError::Shape(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_min_density_failure_is_reported() {
        let jumper = Jumper::new(
            JumpMode::MinDensityHard { min_density: 0.3 },
            Some(Arc::new(Broken)),
        )
        .unwrap();
        let m = Array3::<f32>::zeros((1, 4, 2));
        let err = jumper
            .jump(&m, &array![[4usize, 2]], &array![[0.0f32, 0.0, 1.0, 2.0]])
            .unwrap_err();
        assert!(matches!(err, GlimpseError::Jumper(_)));
    }
}
