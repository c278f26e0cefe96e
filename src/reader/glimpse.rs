//! Glimpse phase: propose the next region from the last committed one.

use ndarray::Array2;

use crate::reader::config::GlimpseMode;
use crate::reader::location::{lengths, DOC_EXTENT, DOC_START};

/// Candidate region starting right after the trailing document edge of
/// `location`, spanning the full query.
///
/// The document extent may come out zero or negative once the region has
/// run off the document; such examples are caught by the overflow check.
pub fn glimpse_location(mode: GlimpseMode, location: &Array2<f32>, dq_size: &Array2<usize>) -> Array2<f32> {
    let batch = location.nrows();
    let mut out = Array2::zeros((batch, 4));
    for b in 0..batch {
        let (d_len, q_len) = lengths(dq_size, b);
        let start = (location[[b, DOC_START]] + location[[b, DOC_EXTENT]]).floor();
        let remaining = d_len as f32 - start;
        let extent = match mode {
            GlimpseMode::FixHard { size } => remaining.min(size as f32),
            GlimpseMode::AllNext => remaining,
        };
        out.row_mut(b).assign(&ndarray::arr1(&[start, 0.0, extent, q_len as f32]));
    }
    out
}
