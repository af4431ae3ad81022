//! Convenience re-exports.
//!
//! ```
//! use flashattn_core::prelude::*;
//!
//! let shape = AttnShape::new(1, 2, 16, 8);
//! let q = Tensor::randn_seeded(shape.qkv_shape().dims(), 0);
//! assert_eq!(AttnShape::from_shape(q.shape()).unwrap(), shape);
//! ```

pub use crate::dtype::DType;
pub use crate::error::FlashError;
pub use crate::layout::AttnShape;
pub use crate::shape::Shape;
pub use crate::storage::{Elements, Storage};
pub use crate::tensor::Tensor;
pub use crate::Result;
