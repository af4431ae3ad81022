//! Configuration for an attention forward pass.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use flashattn_core::{DType, FlashError, Result};

/// Execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// One execution context per (batch, head); tiles processed in order.
    #[default]
    Sequential,
    /// One cooperating lane group per query row.
    GroupParallel,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Sequential, Backend::GroupParallel];
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sequential => write!(f, "sequential"),
            Backend::GroupParallel => write!(f, "group_parallel"),
        }
    }
}

impl FromStr for Backend {
    type Err = FlashError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sequential" | "seq" | "tiled" => Ok(Backend::Sequential),
            "group_parallel" | "group" | "parallel" => Ok(Backend::GroupParallel),
            other => Err(FlashError::invalid(
                "backend",
                format!("unknown backend '{other}' (expected sequential or group_parallel)"),
            )),
        }
    }
}

/// Configuration for [`forward`](crate::forward).
///
/// Every field has a default, so a JSON file only needs to name the
/// fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Query tile size (Br).
    pub block_q: usize,

    /// Key/value tile size (Bc).
    pub block_k: usize,

    /// Restrict each query to keys at or before its own position.
    pub causal: bool,

    /// Storage format of Q, K and V. Outputs are always f32.
    pub dtype: DType,

    /// Execution strategy.
    pub backend: Backend,

    /// Lanes per cooperating group (group-parallel backend only).
    /// Must be a power of two.
    pub lanes: usize,

    /// Size of a dedicated thread pool. `None` runs on rayon's global pool.
    pub num_threads: Option<usize>,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            block_q: 64,
            block_k: 64,
            causal: false,
            dtype: DType::F32,
            backend: Backend::Sequential,
            lanes: 32,
            num_threads: None,
        }
    }
}

impl AttentionConfig {
    pub fn with_blocks(mut self, block_q: usize, block_k: usize) -> Self {
        self.block_q = block_q;
        self.block_k = block_k;
        self
    }

    pub fn with_causal(mut self, causal: bool) -> Self {
        self.causal = causal;
        self
    }

    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_num_threads(mut self, num_threads: Option<usize>) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Reject values that cannot drive a forward pass.
    pub fn validate(&self) -> Result<()> {
        if self.block_q == 0 {
            return Err(FlashError::invalid("block_q", "must be > 0"));
        }
        if self.block_k == 0 {
            return Err(FlashError::invalid("block_k", "must be > 0"));
        }
        if !self.lanes.is_power_of_two() {
            return Err(FlashError::invalid(
                "lanes",
                format!("must be a power of two, got {}", self.lanes),
            ));
        }
        if self.num_threads == Some(0) {
            return Err(FlashError::invalid("num_threads", "must be > 0 when set"));
        }
        Ok(())
    }
}
