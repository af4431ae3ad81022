//! # flashattn-kernels
//!
//! Attention forward pass, `O = softmax(QKᵀ/√D)·V`, computed tile by tile
//! with a streaming softmax so the N×N score matrix is never built.
//!
//! Provides:
//! - A sequential backend: one thread of control per (batch, head)
//! - A group-parallel backend: one cooperating lane group per query row
//! - Causal masking
//! - f16 / bf16 inputs, widened on load, with f32 accumulation
//! - An unblocked reference implementation and a parity report
//!
//! ```
//! use flashattn_core::AttnShape;
//! use flashattn_kernels::{check_parity, AttentionConfig, Backend};
//!
//! let cfg = AttentionConfig::default()
//!     .with_blocks(16, 16)
//!     .with_backend(Backend::GroupParallel);
//! let report = check_parity(AttnShape::new(1, 1, 40, 16), &cfg, 0).unwrap();
//! assert!(report.passed);
//! ```

pub mod config;
pub mod forward;
pub mod group;
pub mod group_parallel;
pub mod inputs;
pub mod mask;
pub mod online_softmax;
pub mod parity;
pub mod reference;
pub mod sequential;
mod scratch;
pub mod tiling;

pub use config::{AttentionConfig, Backend};
pub use forward::{forward, forward_alloc, AttentionOutput};
pub use group::LaneGroup;
pub use group_parallel::group_parallel_forward;
pub use inputs::AttentionInputs;
pub use mask::Score;
pub use online_softmax::RowState;
pub use parity::{check_parity, compare, max_abs_diff, random_qkv, ParityReport, Tolerance};
pub use reference::{reference_forward, reference_forward_into, reference_forward_with_lse};
pub use sequential::sequential_forward;
pub use tiling::TileGeometry;
