//! Error taxonomy shared by the grid scanner and the selective reader.
//!
//! Everything here is raised synchronously while a forward pass is being
//! assembled; nothing is retried. Non-finite values produced by unguarded
//! arithmetic (cosine interaction on a zero-norm embedding) are *not* errors
//! and propagate through the outputs unchanged.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GlimpseError {
    /// Unsupported mode name or a missing mode-specific parameter.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("parameter '{name}' has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    InvalidTokenId { id: u32, vocab_size: usize },

    #[error("density jumper failed: {0}")]
    Jumper(#[source] anyhow::Error),
}

impl GlimpseError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, GlimpseError>;
