//! Parallel combinators over tasks.
//!
//! - [`map_both`]: run two tasks in parallel, combine both successes.
//! - [`sequence`]: run many tasks in parallel, keep positional order.
//! - [`first_completed_of`]: run many tasks in parallel, first wins.
//!
//! All three share the same failure discipline: at most one outward
//! completion, siblings canceled on the first failure, and late
//! failures routed to the scheduler's failure sink instead of a
//! callback that has already fired.

pub mod both;
pub mod race;

pub use both::{map_both, sequence};
pub use race::first_completed_of;
