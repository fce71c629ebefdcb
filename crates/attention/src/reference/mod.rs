//! Portable, exact implementations of scaled dot-product attention.
//!
//! These paths favour clarity over absolute performance and serve as the
//! baseline the decoder layers run on.

pub mod exact;

pub use exact::ExactAttention;
