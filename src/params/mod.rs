//! Parameter namespace: named learned arrays with create-on-first-use,
//! reuse-thereafter semantics.

pub mod store;

pub use store::{Initializer, ParamStore, Scope};
