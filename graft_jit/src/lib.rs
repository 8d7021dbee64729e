//! Interprocedural inlining for a sea-of-nodes JIT.
//!
//! - Sea-of-nodes IR with value stamps and a block partition
//! - Per-kind cost model for size and frequency-weighted cycles
//! - Argument specialization of candidate graphs
//! - Relevance-based inlining policy and a worklist driver
//! - Phase size contracts
#![deny(unsafe_code)]
pub mod error;
pub mod ir;
pub mod opt;

pub use error::{InlineError, InlineResult};
