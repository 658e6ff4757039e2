//! Per-host payload stores with blocking retrieval.
//!
//! Both stores follow the same pattern: a caller that finds nothing registers a
//! pending request under the store lock and parks on a [`ResultSlot`]; every
//! insert checks the pending requests in registration order and hands the new
//! item straight to the first one that matches.
//!
//! [`ResultSlot`]: crate::sync::ResultSlot

mod classical;
mod quantum;

pub use classical::ClassicalStorage;
pub use quantum::{CapacityPolicy, Insertion, Purpose, QuantumStorage};
