//! Generation cache and content-addressed storage.

mod coalesce;
mod content;

pub use coalesce::{Coalescer, CoalescerStats, Outcome, Pending};
pub use content::{content_hash, ContentStore};
