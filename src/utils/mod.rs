//! Utility modules shared across the crate.

pub mod cancel;

pub use cancel::CancelHandle;
