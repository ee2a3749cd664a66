//! Generic Containers
//!
//! Small amortized-O(1) containers used by the walkers, the matcher,
//! and the router.  These are deliberately minimal; popping an empty
//! container is a caller bug and panics.

pub mod stack;
pub mod queue;

pub use stack::Stack;
pub use queue::Queue;
