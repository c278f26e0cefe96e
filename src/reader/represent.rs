//! Represent phase: score the committed region of every example.
//!
//! Region bounds differ per example, so `sum_hard` cannot be one vectorized
//! reduction: it runs an independent rectangle sum per example, spread over
//! the rayon pool.

use ndarray::{s, Array1, Array2, Array3, Axis};
use rayon::prelude::*;

use crate::error::{GlimpseError, Result};
use crate::nn::rnn_cell::BasicRnnCell;
use crate::params::{ParamStore, Scope};
use crate::reader::config::RepresentMode;
use crate::reader::location::{index_range, DOC_EXTENT, DOC_START, QUERY_EXTENT, QUERY_START};

/// Inputs the represent phase may read.
pub struct RepresentInput<'a> {
    pub match_matrix: &'a Array3<f32>,
    pub query_emb: &'a Array3<f32>,
    pub doc_emb: &'a Array3<f32>,
}

pub fn represent(
    mode: RepresentMode,
    input: &RepresentInput<'_>,
    location: &Array2<f32>,
    params: &mut ParamStore,
    scope: &Scope,
) -> Result<Array1<f32>> {
    match mode {
        RepresentMode::SumHard => sum_hard(input.match_matrix, location),
        RepresentMode::RnnHard { rnn_size } => rnn_hard(
            &BasicRnnCell::new(rnn_size),
            input.query_emb,
            input.doc_emb,
            location,
            params,
            &scope.child("rnn"),
        ),
        RepresentMode::Test => Ok(Array1::ones(location.nrows())),
    }
}

/// Sum of the match values inside each example's rectangle.
pub fn sum_hard(match_matrix: &Array3<f32>, location: &Array2<f32>) -> Result<Array1<f32>> {
    let (batch, rows, cols) = match_matrix.dim();
    if location.nrows() != batch {
        return Err(GlimpseError::shape(format!(
            "sum_hard: {} locations for a batch of {batch}",
            location.nrows()
        )));
    }
    let sums: Vec<f32> = (0..batch)
        .into_par_iter()
        .map(|b| {
            let (d0, d1) = index_range(location[[b, DOC_START]], location[[b, DOC_EXTENT]], rows);
            let (q0, q1) = index_range(location[[b, QUERY_START]], location[[b, QUERY_EXTENT]], cols);
            match_matrix.slice(s![b, d0..d1, q0..q1]).sum()
        })
        .collect();
    Ok(Array1::from_vec(sums))
}

/// Gather `[batch, max(offset), dim]` windows `batch[b, start[b]..start[b] + offset[b]]`,
/// zero-padded past each window's end and past the end of the sequence.
pub fn batch_slice(batch: &Array3<f32>, start: &[usize], offset: &[usize]) -> Array3<f32> {
    let (n, len, dim) = batch.dim();
    let width = offset.iter().copied().max().unwrap_or(0);
    let mut out = Array3::zeros((n, width, dim));
    for b in 0..n.min(start.len()).min(offset.len()) {
        let lo = start[b].min(len);
        let hi = start[b].saturating_add(offset[b]).min(len);
        if hi > lo {
            out.slice_mut(s![b, ..hi - lo, ..])
                .assign(&batch.slice(s![b, lo..hi, ..]));
        }
    }
    out
}

/// Encode the document and query slices of each region with one shared RNN
/// and score the region by the inner product of the two final states.
pub fn rnn_hard(
    cell: &BasicRnnCell,
    query_emb: &Array3<f32>,
    doc_emb: &Array3<f32>,
    location: &Array2<f32>,
    params: &mut ParamStore,
    scope: &Scope,
) -> Result<Array1<f32>> {
    let batch = location.nrows();
    if doc_emb.dim().0 != batch || query_emb.dim().0 != batch {
        return Err(GlimpseError::shape(format!(
            "rnn_hard: embeddings {:?}/{:?} for a batch of {batch}",
            doc_emb.shape(),
            query_emb.shape()
        )));
    }
    let floor = |b: usize, k: usize| location[[b, k]].floor().max(0.0) as usize;
    let d_start: Vec<usize> = (0..batch).map(|b| floor(b, DOC_START)).collect();
    let d_offset: Vec<usize> = (0..batch).map(|b| floor(b, DOC_EXTENT)).collect();
    let q_start: Vec<usize> = (0..batch).map(|b| floor(b, QUERY_START)).collect();
    let q_offset: Vec<usize> = (0..batch).map(|b| floor(b, QUERY_EXTENT)).collect();

    let d_region = batch_slice(doc_emb, &d_start, &d_offset);
    let q_region = batch_slice(query_emb, &q_start, &q_offset);
    let d_state = cell.run_sequences(&d_region, &d_offset, params, scope)?;
    let q_state = cell.run_sequences(&q_region, &q_offset, params, scope)?;
    Ok((d_state * q_state).sum_axis(Axis(1)))
}
