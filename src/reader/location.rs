//! Per-example reading regions.
//!
//! A location batch is a `[batch, 4]` array whose rows are
//! `[doc_start, query_start, doc_extent, query_extent]`. Values are floats;
//! consumers take the floor when they need row/column indices.

use ndarray::{Array1, Array2, Axis, Zip};

pub const DOC_START: usize = 0;
pub const QUERY_START: usize = 1;
pub const DOC_EXTENT: usize = 2;
pub const QUERY_EXTENT: usize = 3;

/// Valid `(doc_len, query_len)` of example `b`.
pub fn lengths(dq_size: &Array2<usize>, b: usize) -> (usize, usize) {
    (dq_size[[b, 0]], dq_size[[b, 1]])
}

/// Examples whose region starts past the last valid document row or query
/// column.
pub fn overflows(location: &Array2<f32>, dq_size: &Array2<usize>) -> Array1<bool> {
    Array1::from_shape_fn(location.nrows(), |b| {
        let (d_len, q_len) = lengths(dq_size, b);
        location[[b, DOC_START]] > d_len as f32 - 1.0 || location[[b, QUERY_START]] > q_len as f32 - 1.0
    })
}

/// Row-wise `where(mask, on_true, on_false)`.
pub fn select_rows(mask: &Array1<bool>, on_true: &Array2<f32>, on_false: &Array2<f32>) -> Array2<f32> {
    let mut out = on_false.clone();
    for (b, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
        if mask[b] {
            row.assign(&on_true.row(b));
        }
    }
    out
}

/// Element-wise `where(mask, on_true, on_false)`.
pub fn select(mask: &Array1<bool>, on_true: &Array1<f32>, on_false: &Array1<f32>) -> Array1<f32> {
    let mut out = on_false.clone();
    Zip::from(&mut out)
        .and(mask)
        .and(on_true)
        .for_each(|o, &m, &t| {
            if m {
                *o = t;
            }
        });
    out
}

/// Half-open index range `[floor(start), floor(start + extent))` clipped to
/// `[0, limit)`. Empty when the region lies outside.
pub fn index_range(start: f32, extent: f32, limit: usize) -> (usize, usize) {
    let lo = start.floor().max(0.0) as usize;
    let hi = (start + extent).floor().max(0.0) as usize;
    let lo = lo.min(limit);
    (lo, hi.clamp(lo, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_overflows() {
        let dq = array![[3usize, 2], [3, 2], [0, 1]];
        let loc = array![[2.0f32, 1.0, 1.0, 2.0], [3.0, 0.0, 0.0, 2.0], [0.0, 0.0, 0.0, 0.0]];
        assert_eq!(overflows(&loc, &dq).to_vec(), vec![false, true, true]);
    }

    #[test]
    fn test_select_rows() {
        let a = array![[1.0f32, 1.0], [2.0, 2.0]];
        let b = array![[9.0f32, 9.0], [8.0, 8.0]];
        let mask = array![true, false];
        assert_eq!(select_rows(&mask, &a, &b), array![[1.0f32, 1.0], [8.0, 8.0]]);
        assert_eq!(
            select(&mask, &array![1.0f32, 2.0], &array![5.0f32, 6.0]),
            array![1.0f32, 6.0]
        );
    }

    #[test]
    fn test_index_range() {
        assert_eq!(index_range(1.0, 2.0, 5), (1, 3));
        assert_eq!(index_range(1.7, 1.0, 5), (1, 2));
        assert_eq!(index_range(4.0, 3.0, 5), (4, 5));
        assert_eq!(index_range(6.0, 1.0, 5), (5, 5));
        assert_eq!(index_range(2.0, -1.0, 5), (2, 2));
    }
}
