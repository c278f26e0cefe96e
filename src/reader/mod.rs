//! Selective reading of a document against a query.

pub mod config;
pub mod glimpse;
pub mod jump;
pub mod location;
pub mod matcher;
pub mod represent;
pub mod selective;

pub use config::{GlimpseMode, Interaction, JumpMode, ReaderConfig, ReaderSettings, RepresentMode};
pub use jump::DensityJumper;
pub use matcher::{match_matrix, EmbeddingTable};
pub use selective::{match_and_read, ReadDiagnostics, ReadTrace, SelectiveReader};
