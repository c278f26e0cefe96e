//! The selective reader loop.
//!
//! Every example of the batch is either *scanning* or *stopped*. One step
//! runs three phases on the whole batch:
//!
//! 1. **Glimpse**: propose the region after the current one; examples whose
//!    proposal starts past the valid lengths stop and keep their location.
//! 2. **Jump**: commit to a sub-region of the glimpse (optionally capped by
//!    `max_jump_offset`); overflowing examples stop as well.
//! 3. **Represent**: score the committed region.
//!
//! Stopped examples are never removed from the batch. Their values are
//! computed along with everyone else's and then replaced by the previous ones
//! (`where(is_stop, old, new)`), so the location and representation of a
//! stopped example stay frozen. The loop ends when every example has stopped
//! or after `max_jump_step` steps. The score is the maximum representation an
//! example reached, counting the initial zero; a NaN anywhere in that history
//! makes the score NaN.

use std::sync::Arc;

use ndarray::{Array1, Array2, Array3};

use crate::config::READER_SCOPE;
use crate::error::{GlimpseError, Result};
use crate::params::{ParamStore, Scope};
use crate::reader::config::ReaderConfig;
use crate::reader::glimpse::glimpse_location;
use crate::reader::jump::{DensityJumper, Jumper};
use crate::reader::location::{self, lengths, DOC_EXTENT, DOC_START};
use crate::reader::matcher::{match_matrix, EmbeddingTable};
use crate::reader::represent::{represent, RepresentInput};

/// Loop state after the last step.
#[derive(Clone, Debug)]
pub struct ReadTrace {
    /// Steps each example took before stopping.
    pub step: Array1<u32>,
    /// `[batch, steps + 1, 4]` locations, starting with the initial one.
    pub location: Array3<f32>,
    /// `[batch, steps + 1]` representation after each step.
    pub representation: Array2<f32>,
    pub stopped: Array1<bool>,
}

/// Score plus diagnostics of [`match_and_read`].
#[derive(Clone, Debug)]
pub struct ReadDiagnostics {
    pub step: Array1<u32>,
    pub location: Array3<f32>,
    pub representation: Array2<f32>,
    pub match_matrix: Array3<f32>,
    /// Mean over the batch of the document fraction up to the end of the
    /// final region, each capped at 1.
    pub complete_ratio: f32,
    /// Fraction of the batch that stopped.
    pub stop_ratio: f32,
    pub doc_embedding: Array3<f32>,
}

pub struct SelectiveReader {
    config: ReaderConfig,
    jumper: Jumper,
    scope: Scope,
}

impl SelectiveReader {
    pub fn new(config: ReaderConfig) -> Result<Self> {
        Self::with_density_jumper(config, None)
    }

    /// Reader whose `min_density_hard` jumps are delegated to `density`.
    pub fn with_density_jumper(
        config: ReaderConfig,
        density: Option<Arc<dyn DensityJumper>>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            jumper: Jumper::new(config.jump, density)?,
            config,
            scope: Scope::new(READER_SCOPE),
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Run the glimpse → jump → represent loop over a match matrix.
    ///
    /// `dq_size` holds the valid `(doc_len, query_len)` per example. The
    /// embeddings are only read by the `rnn_hard` representation.
    pub fn read(
        &self,
        match_matrix: &Array3<f32>,
        dq_size: &Array2<usize>,
        query_emb: &Array3<f32>,
        doc_emb: &Array3<f32>,
        params: &mut ParamStore,
    ) -> Result<(Array1<f32>, ReadTrace)> {
        let batch = match_matrix.dim().0;
        if dq_size.dim() != (batch, 2) {
            return Err(GlimpseError::shape(format!(
                "dq_size is {:?}, expected [{batch}, 2]",
                dq_size.shape()
            )));
        }
        let input = RepresentInput {
            match_matrix,
            query_emb,
            doc_emb,
        };
        let represent_scope = self.scope.child("Represent");
        let unit = Array2::ones((batch, 4));

        let mut locations = vec![Array2::<f32>::zeros((batch, 4))];
        let mut states = vec![Array1::<f32>::zeros(batch)];
        let mut is_stop = Array1::from_elem(batch, false);
        let mut step = Array1::<u32>::zeros(batch);
        let mut time = 0;
        tracing::debug!(batch, max_jump_step = self.config.max_jump_step, "selective read");

        while !is_stop.iter().all(|&s| s) && time < self.config.max_jump_step {
            let current = &locations[time];

            let glimpse = glimpse_location(self.config.glimpse, current, dq_size);
            let new_stop = location::overflows(&glimpse, dq_size);
            let glimpse = location::select_rows(&new_stop, current, &glimpse);
            is_stop.zip_mut_with(&new_stop, |s, &n| *s |= n);

            let mut jumped = self.jumper.jump(match_matrix, dq_size, &glimpse)?;
            if let Some(cap) = self.config.max_jump_offset {
                jumped
                    .slice_mut(ndarray::s![.., DOC_EXTENT..])
                    .mapv_inplace(|v| v.min(cap));
            }
            let new_stop = location::overflows(&jumped, dq_size);
            is_stop.zip_mut_with(&new_stop, |s, &n| *s |= n);
            let next = location::select_rows(&is_stop, current, &jumped);

            // stopped examples are scored on a unit placeholder and discarded
            let placeholder = location::select_rows(&is_stop, &unit, &next);
            let fresh = represent(self.config.represent, &input, &placeholder, params, &represent_scope)?;
            let state = location::select(&is_stop, &states[time], &fresh);

            step.zip_mut_with(&is_stop, |n, &s| {
                if !s {
                    *n += 1;
                }
            });
            tracing::trace!(
                time,
                stopped = is_stop.iter().filter(|&&s| s).count(),
                "reader step"
            );
            locations.push(next);
            states.push(state);
            time += 1;
        }

        let steps = locations.len();
        let location = Array3::from_shape_fn((batch, steps, 4), |(b, t, k)| locations[t][[b, k]]);
        let representation = Array2::from_shape_fn((batch, steps), |(b, t)| states[t][b]);
        let score = Array1::from_shape_fn(batch, |b| {
            states.iter().map(|s| s[b]).fold(f32::NEG_INFINITY, nan_max)
        });
        tracing::debug!(
            steps = time,
            stopped = is_stop.iter().filter(|&&s| s).count(),
            "selective read finished"
        );
        Ok((
            score,
            ReadTrace {
                step,
                location,
                representation,
                stopped: is_stop,
            },
        ))
    }
}

/// `max` that keeps NaN: a non-finite representation must reach the score.
fn nan_max(acc: f32, v: f32) -> f32 {
    if acc.is_nan() || v.is_nan() {
        f32::NAN
    } else {
        acc.max(v)
    }
}

/// Mean over the batch of `min((doc_start + doc_extent) / doc_len, 1)` for
/// the final locations. An empty document counts as fully read.
pub fn complete_ratio(final_location: &Array2<f32>, dq_size: &Array2<usize>) -> f32 {
    let batch = final_location.nrows();
    if batch == 0 {
        return 0.0;
    }
    let total: f32 = (0..batch)
        .map(|b| {
            let (d_len, _) = lengths(dq_size, b);
            if d_len == 0 {
                return 1.0;
            }
            let end = final_location[[b, DOC_START]] + final_location[[b, DOC_EXTENT]];
            (end / d_len as f32).min(1.0)
        })
        .sum();
    total / batch as f32
}

/// Fraction of `true` flags; 0 for an empty batch.
pub fn stop_ratio(stopped: &Array1<bool>) -> f32 {
    if stopped.is_empty() {
        return 0.0;
    }
    stopped.iter().filter(|&&s| s).count() as f32 / stopped.len() as f32
}

/// Embed, match and read: the full query/document scoring path.
///
/// Returns the per-example score and the diagnostics of the read.
pub fn match_and_read(
    query: &Array2<u32>,
    doc: &Array2<u32>,
    dq_size: &Array2<usize>,
    embeddings: &EmbeddingTable,
    reader: &SelectiveReader,
    params: &mut ParamStore,
) -> Result<(Array1<f32>, ReadDiagnostics)> {
    let query_emb = embeddings.lookup(query)?;
    let doc_emb = embeddings.lookup(doc)?;
    let matrix = match_matrix(query, doc, &query_emb, &doc_emb, reader.config().interaction)?;

    let (score, trace) = reader.read(&matrix, dq_size, &query_emb, &doc_emb, params)?;
    let last = trace.location.dim().1 - 1;
    let final_location = trace.location.index_axis(ndarray::Axis(1), last).to_owned();

    let diagnostics = ReadDiagnostics {
        complete_ratio: complete_ratio(&final_location, dq_size),
        stop_ratio: stop_ratio(&trace.stopped),
        step: trace.step,
        location: trace.location,
        representation: trace.representation,
        match_matrix: matrix,
        doc_embedding: doc_emb,
    };
    Ok((score, diagnostics))
}
