//! Embedding lookup and the document × query match matrix.

use ndarray::{Array2, Array3, Axis};

use crate::error::{GlimpseError, Result};
use crate::reader::config::Interaction;

/// Token embedding table, `[vocab_size, embedding_dim]`.
///
/// The table's contents come from the caller; the reader never updates it.
#[derive(Clone, Debug)]
pub struct EmbeddingTable {
    weight: Array2<f32>,
}

impl EmbeddingTable {
    pub fn new(weight: Array2<f32>) -> Self {
        Self { weight }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.nrows()
    }

    pub fn dim(&self) -> usize {
        self.weight.ncols()
    }

    /// Map `[batch, len]` token ids to `[batch, len, dim]` embeddings.
    pub fn lookup(&self, ids: &Array2<u32>) -> Result<Array3<f32>> {
        let (batch, len) = ids.dim();
        let vocab_size = self.vocab_size();
        let mut out = Array3::zeros((batch, len, self.dim()));
        for ((b, t), &id) in ids.indexed_iter() {
            if id as usize >= vocab_size {
                return Err(GlimpseError::InvalidTokenId { id, vocab_size });
            }
            out.slice_mut(ndarray::s![b, t, ..])
                .assign(&self.weight.row(id as usize));
        }
        Ok(out)
    }
}

/// Build the `[batch, doc_len, query_len]` match matrix.
///
/// `indicator` compares ids only; `dot` and `cosine` use the embeddings.
/// Cosine divides by the product of norms without an epsilon: a zero-norm
/// embedding turns its row or column into NaN/inf.
pub fn match_matrix(
    query: &Array2<u32>,
    doc: &Array2<u32>,
    query_emb: &Array3<f32>,
    doc_emb: &Array3<f32>,
    interaction: Interaction,
) -> Result<Array3<f32>> {
    let (batch, q_len) = query.dim();
    let (doc_batch, d_len) = doc.dim();
    if doc_batch != batch {
        return Err(GlimpseError::shape(format!(
            "query batch {batch} != doc batch {doc_batch}"
        )));
    }

    if interaction == Interaction::Indicator {
        return Ok(Array3::from_shape_fn((batch, d_len, q_len), |(b, d, q)| {
            if doc[[b, d]] == query[[b, q]] {
                1.0
            } else {
                0.0
            }
        }));
    }

    if query_emb.dim().0 != batch || doc_emb.dim().0 != batch || query_emb.dim().2 != doc_emb.dim().2 {
        return Err(GlimpseError::shape(format!(
            "embedding shapes {:?} and {:?} do not match batch {batch}",
            query_emb.shape(),
            doc_emb.shape()
        )));
    }
    let mut matrix = Array3::zeros((batch, d_len, q_len));
    for (b, mut out) in matrix.outer_iter_mut().enumerate() {
        let d = doc_emb.index_axis(Axis(0), b);
        let q = query_emb.index_axis(Axis(0), b);
        out.assign(&d.dot(&q.t()));
    }

    if interaction == Interaction::Cosine {
        let d_norm = doc_emb.mapv(|v| v * v).sum_axis(Axis(2)).mapv(f32::sqrt);
        let q_norm = query_emb.mapv(|v| v * v).sum_axis(Axis(2)).mapv(f32::sqrt);
        let denom = &d_norm.insert_axis(Axis(2)) * &q_norm.insert_axis(Axis(1));
        matrix /= &denom;
    }
    Ok(matrix)
}
