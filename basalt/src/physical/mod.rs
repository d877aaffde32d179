//! Physical planning.
//!
//! The [`PhysicalConverter`] walks the rewritten logical plan top down, passing each node
//! the [`RequiredProperty`](crate::properties::RequiredProperty) its parent needs, and
//! picks the cheapest physical candidate bottom up. The post passes then clean up the
//! chosen plan.

mod converter;
pub use converter::*;
mod post;
pub use post::*;
