//! # flashattn-core
//!
//! Tensor storage and layout primitives shared by the attention kernels.
//!
//! Provides:
//! - Storage dtypes (F32, F16, BF16) widened to f32 on load
//! - Shared, read-only `Tensor` buffers with seeded random constructors
//! - The `[batch, heads, seq_len, head_dim]` attention layout and indexing
//! - `FlashError`, the error type used across the workspace

pub mod dtype;
pub mod error;
pub mod layout;
pub mod prelude;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use dtype::DType;
pub use error::FlashError;
pub use layout::AttnShape;
pub use shape::Shape;
pub use storage::{Elements, Storage};
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, FlashError>;
