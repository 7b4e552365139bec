//! Core traits for scope-bound instances.

mod dispose;

pub use dispose::{AsyncDispose, Dispose};
